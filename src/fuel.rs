//! Fuels and the fuel-substitution relation.
//!
//! A fuel `F` may be substituted by any fuel `F1` with `F_subst(F, F1)`. Fuels whose only substitute
//! is themselves are *settlement* fuels: the only fuels that balances and flows are booked in.
//! Fuels which are supersets of others (e.g. "hydrogen" covering "green hydrogen" and "grey
//! hydrogen") are resolved into their settlement fuels through the relation.
use crate::id::{FuelID, define_id_getter};
use anyhow::{Result, bail, ensure};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::Deserialize;
use std::collections::HashMap;

/// A map of [`Fuel`]s, keyed by fuel ID
pub type FuelMap = IndexMap<FuelID, Fuel>;

/// A physical commodity
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Fuel {
    /// Unique identifier for the fuel (e.g. "Electricity")
    pub id: FuelID,
    /// Base unit of flows of this fuel (e.g. "kWh")
    pub unit: String,
    /// Whether the fuel is a variable renewable source (never balanced)
    #[serde(default)]
    pub vre: bool,
    /// Whether the fuel is used as a reference for the reported prices
    #[serde(default)]
    pub reference: bool,
    /// Specific energy, used to derive auxiliary medium flows from production
    #[serde(default)]
    pub spec_energy: f64,
    /// Constant system self-consumption per unit of capacity of flagged technologies
    #[serde(default)]
    pub share_const_cons_system: f64,
}
define_id_getter! {Fuel, FuelID}

/// The substitution relation between fuels, with its derived lookups
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FuelSubstitution {
    /// For each fuel, every fuel that can substitute it (including itself)
    substitutes: IndexMap<FuelID, Vec<FuelID>>,
    /// For each fuel, the settlement fuels that can substitute it
    settlement_substitutes: IndexMap<FuelID, Vec<FuelID>>,
    /// For each fuel, the fuels it can substitute (the inverse relation)
    substituted: IndexMap<FuelID, Vec<FuelID>>,
    /// Settlement fuels, in fuel order
    settlement: IndexSet<FuelID>,
}

impl FuelSubstitution {
    /// Build the relation from explicit `(fuel, substitute)` pairs.
    ///
    /// Every fuel is a substitute of itself. Returns an error if a pair refers to an unknown fuel,
    /// if the relation contains a cycle, or if some fuel cannot be resolved to a settlement fuel.
    pub fn new<I>(fuels: &FuelMap, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (FuelID, FuelID)>,
    {
        let mut substitutes: IndexMap<FuelID, Vec<FuelID>> = fuels
            .keys()
            .map(|id| (id.clone(), vec![id.clone()]))
            .collect();

        let mut graph = DiGraph::<FuelID, ()>::new();
        let nodes: HashMap<FuelID, _> = fuels
            .keys()
            .map(|id| (id.clone(), graph.add_node(id.clone())))
            .collect();

        for (fuel, substitute) in pairs {
            let (Some(from), Some(to)) = (nodes.get(&fuel), nodes.get(&substitute)) else {
                bail!("Substitution {fuel} -> {substitute} refers to an unknown fuel");
            };
            if fuel == substitute {
                continue;
            }

            let entry = &mut substitutes[&fuel];
            if !entry.contains(&substitute) {
                entry.push(substitute);
                graph.add_edge(*from, *to, ());
            }
        }
        ensure!(
            !is_cyclic_directed(&graph),
            "The fuel substitution relation contains a cycle"
        );

        let settlement: IndexSet<FuelID> = substitutes
            .iter()
            .filter(|(_, subs)| subs.len() == 1)
            .map(|(id, _)| id.clone())
            .collect();

        let mut settlement_substitutes = IndexMap::new();
        for (fuel, subs) in &substitutes {
            let settled: Vec<FuelID> = subs
                .iter()
                .filter(|f1| settlement.contains(*f1))
                .cloned()
                .collect();
            ensure!(
                !settled.is_empty(),
                "Fuel {fuel} cannot be resolved to a settlement fuel"
            );
            settlement_substitutes.insert(fuel.clone(), settled);
        }

        let mut substituted: IndexMap<FuelID, Vec<FuelID>> =
            fuels.keys().map(|id| (id.clone(), Vec::new())).collect();
        for (fuel, subs) in &substitutes {
            for f1 in subs {
                substituted[f1].push(fuel.clone());
            }
        }

        Ok(Self {
            substitutes,
            settlement_substitutes,
            substituted,
            settlement,
        })
    }

    /// Whether `fuel` can be substituted by `substitute`
    pub fn can_substitute(&self, fuel: &FuelID, substitute: &FuelID) -> bool {
        self.substitutes
            .get(fuel)
            .is_some_and(|subs| subs.contains(substitute))
    }

    /// Whether the fuel is a settlement fuel
    pub fn is_settlement(&self, fuel: &FuelID) -> bool {
        self.settlement.contains(fuel)
    }

    /// All settlement fuels
    pub fn settlement_fuels(&self) -> impl Iterator<Item = &FuelID> {
        self.settlement.iter()
    }

    /// Every fuel which can substitute `fuel` (including itself)
    pub fn substitutes(&self, fuel: &FuelID) -> &[FuelID] {
        self.substitutes.get(fuel).map_or(&[], Vec::as_slice)
    }

    /// The settlement fuels which can substitute `fuel`
    pub fn settlement_substitutes(&self, fuel: &FuelID) -> &[FuelID] {
        self.settlement_substitutes
            .get(fuel)
            .map_or(&[], Vec::as_slice)
    }

    /// Every fuel which `fuel` can substitute (including itself)
    pub fn substituted_by(&self, fuel: &FuelID) -> &[FuelID] {
        self.substituted.get(fuel).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, fuel};

    fn fuels(ids: &[&str]) -> FuelMap {
        ids.iter()
            .map(|id| (FuelID::new(id), fuel(id, "kWh")))
            .collect()
    }

    fn pair(a: &str, b: &str) -> (FuelID, FuelID) {
        (FuelID::new(a), FuelID::new(b))
    }

    #[test]
    fn test_settlement_fuels() {
        let fuels = fuels(&["H2", "H2_green", "H2_grey", "Electricity"]);
        let subst = FuelSubstitution::new(
            &fuels,
            [pair("H2", "H2_green"), pair("H2", "H2_grey")],
        )
        .unwrap();

        let settlement: Vec<_> = subst.settlement_fuels().map(ToString::to_string).collect();
        assert_eq!(settlement, ["H2_green", "H2_grey", "Electricity"]);
        assert!(!subst.is_settlement(&"H2".into()));
        assert_eq!(
            subst.settlement_substitutes(&"H2".into()),
            [FuelID::new("H2_green"), FuelID::new("H2_grey")]
        );
        assert_eq!(
            subst.settlement_substitutes(&"Electricity".into()),
            [FuelID::new("Electricity")]
        );
        assert!(subst.can_substitute(&"H2".into(), &"H2".into()));
        assert!(subst.can_substitute(&"H2".into(), &"H2_grey".into()));
        assert!(!subst.can_substitute(&"H2_grey".into(), &"H2".into()));
        assert_eq!(
            subst.substituted_by(&"H2_grey".into()),
            [FuelID::new("H2"), FuelID::new("H2_grey")]
        );
    }

    #[test]
    fn test_duplicate_pairs_ignored() {
        let fuels = fuels(&["A", "B"]);
        let subst =
            FuelSubstitution::new(&fuels, [pair("A", "B"), pair("A", "B"), pair("A", "A")])
                .unwrap();
        assert_eq!(subst.substitutes(&"A".into()).len(), 2);
    }

    #[test]
    fn test_cycle_rejected() {
        let fuels = fuels(&["A", "B"]);
        assert_error!(
            FuelSubstitution::new(&fuels, [pair("A", "B"), pair("B", "A")]),
            "The fuel substitution relation contains a cycle"
        );
    }

    #[test]
    fn test_unresolved_fuel_rejected() {
        // A only resolves to B, which is itself a superset of C
        let fuels = fuels(&["A", "B", "C"]);
        assert_error!(
            FuelSubstitution::new(&fuels, [pair("A", "B"), pair("B", "C")]),
            "Fuel A cannot be resolved to a settlement fuel"
        );
    }

    #[test]
    fn test_unknown_fuel_rejected() {
        let fuels = fuels(&["A"]);
        assert!(FuelSubstitution::new(&fuels, [pair("A", "Z")]).is_err());
    }
}
