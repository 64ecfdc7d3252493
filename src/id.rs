//! Identifier types for nodes, technologies, fuels and auxiliary media.
use anyhow::{Context, Result};
use indexmap::IndexSet;

/// A trait alias for ID types
pub trait IDLike:
    Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}
impl<T> IDLike for T where
    T: Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            std::hash::Hash,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            serde::Deserialize,
            Debug,
            serde::Serialize,
        )]
        /// An ID type (e.g. `NodeID`, `FuelID`, etc.)
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl $name {
            /// Create a new ID from a string slice
            pub fn new(id: &str) -> Self {
                $name(std::rc::Rc::from(id))
            }
        }
    };
}

define_id_type!(NodeID);
define_id_type!(TechID);
define_id_type!(FuelID);
define_id_type!(AuxMediumID);

/// Indicates that the struct has an ID field
pub trait HasID<ID: IDLike> {
    /// Get the struct's ID
    fn get_id(&self) -> &ID;
}

/// Implement the `HasID` trait for the given type, assuming it has a field called `id`
macro_rules! define_id_getter {
    ($t:ty, $id_ty:ty) => {
        impl crate::id::HasID<$id_ty> for $t {
            fn get_id(&self) -> &$id_ty {
                &self.id
            }
        }
    };
}
pub(crate) use define_id_getter;

/// A data structure containing a set of IDs
pub trait IDCollection<ID: IDLike> {
    /// Look up an ID by its string representation, returning a copy of the stored ID.
    fn get_id_by_str(&self, id: &str) -> Result<ID>;
}

impl<ID: IDLike> IDCollection<ID> for IndexSet<ID> {
    fn get_id_by_str(&self, id: &str) -> Result<ID> {
        let found = self
            .get(id)
            .with_context(|| format!("Unknown ID {id} found"))?;
        Ok(found.clone())
    }
}

impl<ID: IDLike, V> IDCollection<ID> for indexmap::IndexMap<ID, V> {
    fn get_id_by_str(&self, id: &str) -> Result<ID> {
        let (found, _) = self
            .get_key_value(id)
            .with_context(|| format!("Unknown ID {id} found"))?;
        Ok(found.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_get_id_by_str() {
        let nodes: IndexSet<NodeID> = ["north", "south"].into_iter().map(NodeID::new).collect();
        assert_eq!(nodes.get_id_by_str("south").unwrap(), NodeID::new("south"));
        assert!(nodes.get_id_by_str("east").is_err());
    }

    #[test]
    fn test_get_id_by_str_map() {
        let fuels: IndexMap<FuelID, u32> = [(FuelID::new("H2"), 1)].into_iter().collect();
        assert_eq!(fuels.get_id_by_str("H2").unwrap(), FuelID::new("H2"));
        assert_eq!(
            fuels.get_id_by_str("CH4").unwrap_err().to_string(),
            "Unknown ID CH4 found"
        );
    }
}
