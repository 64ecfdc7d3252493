//! Formulation of the capacity expansion and dispatch problem as a linear program.
//!
//! The problem is built independently of any solver: variables are created lazily in families
//! keyed by their index tuple, constraints are collected as bounded rows of linear terms and the
//! objective is a single [`LinExpr`]. [`crate::solver`] translates the result for a concrete solver.
use crate::id::{FuelID, NodeID, TechID};
use crate::model::Model;
use crate::time_index::TimeStep;
use anyhow::{Result, bail};
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;
use std::hash::Hash;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Format a constraint index for labelling rows
macro_rules! key {
    ($($part:expr),+) => {
        || [$($part.to_string()),+].join(", ")
    };
}
pub(crate) use key;

mod constraints;
pub mod expressions;
pub use expressions::{CostStreams, DiscountedCosts};

/// Residuals smaller than this are treated as zero when checking constant constraints
const TAUTOLOGY_TOLERANCE: f64 = 1e-9;

/// A decision variable, referring to a column of the [`LinearProgram`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(usize);

impl Variable {
    /// Position of the variable's column
    pub fn index(self) -> usize {
        self.0
    }
}

/// An affine expression of decision variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    terms: IndexMap<Variable, f64>,
    constant: f64,
}

impl LinExpr {
    /// An expression without variables
    pub fn constant(value: f64) -> Self {
        Self {
            terms: IndexMap::new(),
            constant: value,
        }
    }

    /// A single variable with coefficient one
    pub fn var(var: Variable) -> Self {
        Self::term(var, 1.0)
    }

    /// A single variable with the given coefficient
    pub fn term(var: Variable, coeff: f64) -> Self {
        let mut expr = Self::default();
        expr.add_term(var, coeff);
        expr
    }

    /// Add `coeff * var` to the expression
    pub fn add_term(&mut self, var: Variable, coeff: f64) {
        *self.terms.entry(var).or_insert(0.0) += coeff;
    }

    /// Add a constant to the expression
    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// Add `factor * other` to the expression
    pub fn add_scaled(&mut self, other: &LinExpr, factor: f64) {
        for (&var, &coeff) in &other.terms {
            self.add_term(var, coeff * factor);
        }
        self.constant += other.constant * factor;
    }

    /// The non-zero terms of the expression
    pub fn terms(&self) -> impl Iterator<Item = (Variable, f64)> + '_ {
        self.terms
            .iter()
            .filter(|(_, coeff)| **coeff != 0.0)
            .map(|(var, coeff)| (*var, *coeff))
    }

    /// The constant part of the expression
    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    /// Whether the expression has no variable with a non-zero coefficient
    pub fn is_constant(&self) -> bool {
        self.terms().next().is_none()
    }

    /// Evaluate the expression for the given column values
    pub fn evaluate(&self, columns: &[f64]) -> f64 {
        self.terms()
            .map(|(var, coeff)| coeff * columns[var.index()])
            .sum::<f64>()
            + self.constant
    }
}

impl From<Variable> for LinExpr {
    fn from(var: Variable) -> Self {
        Self::var(var)
    }
}

impl From<f64> for LinExpr {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl AddAssign<&LinExpr> for LinExpr {
    fn add_assign(&mut self, rhs: &LinExpr) {
        self.add_scaled(rhs, 1.0);
    }
}

impl AddAssign for LinExpr {
    fn add_assign(&mut self, rhs: LinExpr) {
        *self += &rhs;
    }
}

impl AddAssign<f64> for LinExpr {
    fn add_assign(&mut self, rhs: f64) {
        self.constant += rhs;
    }
}

impl Mul<f64> for LinExpr {
    type Output = LinExpr;

    fn mul(mut self, rhs: f64) -> LinExpr {
        for coeff in self.terms.values_mut() {
            *coeff *= rhs;
        }
        self.constant *= rhs;
        self
    }
}

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self * -1.0
    }
}

impl Add for LinExpr {
    type Output = LinExpr;

    fn add(mut self, rhs: LinExpr) -> LinExpr {
        self += &rhs;
        self
    }
}

impl Sub for LinExpr {
    type Output = LinExpr;

    fn sub(mut self, rhs: LinExpr) -> LinExpr {
        self.add_scaled(&rhs, -1.0);
        self
    }
}

impl Sum for LinExpr {
    fn sum<I: Iterator<Item = LinExpr>>(iter: I) -> Self {
        iter.fold(LinExpr::default(), |acc, expr| acc + expr)
    }
}

/// The relation between the two sides of a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Left-hand side less than or equal to right-hand side
    Le,
    /// Left-hand side greater than or equal to right-hand side
    Ge,
    /// Both sides equal
    Eq,
}

/// A constraint reduced to `lower <= sum(terms) <= upper`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    /// Lower bound (may be `-inf`)
    pub lower: f64,
    /// Upper bound (may be `inf`)
    pub upper: f64,
    /// Variables with their coefficients
    pub terms: Vec<(Variable, f64)>,
}

/// The result of formulating a single constraint
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintOutcome {
    /// The constraint holds for any assignment and is left out
    Omit,
    /// The constraint cannot hold for any assignment
    Infeasible,
    /// A constraint to add to the problem
    Constraint(LinearConstraint),
}

impl ConstraintOutcome {
    /// Formulate `lhs <rel> rhs`.
    ///
    /// Everything is moved to the left-hand side. If no variable remains, the constant residual
    /// decides whether the constraint is omitted or infeasible.
    pub fn relation(lhs: LinExpr, rel: Relation, rhs: LinExpr) -> Self {
        let diff = lhs - rhs;
        let residual = diff.constant_term();
        let terms: Vec<_> = diff.terms().collect();

        if terms.is_empty() {
            let holds = match rel {
                Relation::Le => residual <= TAUTOLOGY_TOLERANCE,
                Relation::Ge => residual >= -TAUTOLOGY_TOLERANCE,
                Relation::Eq => residual.abs() <= TAUTOLOGY_TOLERANCE,
            };
            return if holds { Self::Omit } else { Self::Infeasible };
        }

        let (lower, upper) = match rel {
            Relation::Le => (f64::NEG_INFINITY, -residual),
            Relation::Ge => (-residual, f64::INFINITY),
            Relation::Eq => (-residual, -residual),
        };

        Self::Constraint(LinearConstraint {
            lower,
            upper,
            terms,
        })
    }

    /// Formulate `lower <= expr <= upper`.
    ///
    /// The constraint is omitted if both bounds are infinite.
    pub fn range(lower: f64, expr: LinExpr, upper: f64) -> Self {
        if lower == f64::NEG_INFINITY && upper == f64::INFINITY {
            return Self::Omit;
        }
        if lower > upper + TAUTOLOGY_TOLERANCE {
            return Self::Infeasible;
        }

        let offset = expr.constant_term();
        let terms: Vec<_> = expr.terms().collect();
        if terms.is_empty() {
            let holds =
                offset >= lower - TAUTOLOGY_TOLERANCE && offset <= upper + TAUTOLOGY_TOLERANCE;
            return if holds { Self::Omit } else { Self::Infeasible };
        }

        Self::Constraint(LinearConstraint {
            lower: lower - offset,
            upper: upper - offset,
            terms,
        })
    }
}

/// A constraint of the problem, labelled with its family and index
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Name of the constraint family (e.g. `fuel_balance`)
    pub family: &'static str,
    /// The index of the constraint within its family
    pub key: String,
    /// The constraint itself
    pub constraint: LinearConstraint,
}

impl Row {
    /// Value of the constraint's terms for the given column values
    pub fn activity(&self, columns: &[f64]) -> f64 {
        self.constraint
            .terms
            .iter()
            .map(|(var, coeff)| coeff * columns[var.index()])
            .sum()
    }

    /// Whether the given column values satisfy the constraint within `tolerance`
    pub fn is_satisfied(&self, columns: &[f64], tolerance: f64) -> bool {
        let activity = self.activity(columns);
        activity >= self.constraint.lower - tolerance
            && activity <= self.constraint.upper + tolerance
    }
}

/// Definition of a decision variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableDef {
    /// Family the variable belongs to
    pub family: &'static str,
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Whether the variable must take an integer value
    pub integer: bool,
}

/// A solver-independent (mixed-integer) linear program, minimising its objective
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    /// Decision variables, one per column
    pub variables: Vec<VariableDef>,
    /// Constraints
    pub rows: Vec<Row>,
    /// The expression to minimise
    pub objective: LinExpr,
    /// Number of constraints left out because they hold trivially
    pub omitted: usize,
}

impl LinearProgram {
    /// Add a column to the problem
    pub fn add_variable(
        &mut self,
        family: &'static str,
        lower: f64,
        upper: f64,
        integer: bool,
    ) -> Variable {
        self.variables.push(VariableDef {
            family,
            lower,
            upper,
            integer,
        });
        Variable(self.variables.len() - 1)
    }

    /// Add a constraint to the problem.
    ///
    /// The key is only formatted for constraints which are actually added.
    ///
    /// # Returns
    ///
    /// An error if the constraint is infeasible by construction.
    pub fn add_constraint<F>(
        &mut self,
        family: &'static str,
        key: F,
        outcome: ConstraintOutcome,
    ) -> Result<()>
    where
        F: FnOnce() -> String,
    {
        match outcome {
            ConstraintOutcome::Omit => self.omitted += 1,
            ConstraintOutcome::Infeasible => {
                bail!("Constraint {family}[{}] is infeasible by construction", key())
            }
            ConstraintOutcome::Constraint(constraint) => self.rows.push(Row {
                family,
                key: key(),
                constraint,
            }),
        }

        Ok(())
    }

    /// Rows belonging to the given constraint family
    pub fn rows_in<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a Row> {
        self.rows.iter().filter(move |row| row.family == family)
    }

    /// Number of integer variables
    pub fn num_integer(&self) -> usize {
        self.variables.iter().filter(|var| var.integer).count()
    }

    /// Number of variables and constraints per family, in order of first appearance
    pub fn family_sizes(&self) -> (IndexMap<&'static str, usize>, IndexMap<&'static str, usize>) {
        let mut variables = IndexMap::new();
        for var in &self.variables {
            *variables.entry(var.family).or_insert(0) += 1;
        }
        let mut rows = IndexMap::new();
        for row in &self.rows {
            *rows.entry(row.family).or_insert(0) += 1;
        }

        (variables, rows)
    }
}

/// A family of decision variables sharing bounds, created on first use
#[derive(Debug, Clone)]
pub struct VarFamily<K> {
    name: &'static str,
    lower: f64,
    upper: f64,
    integer: bool,
    vars: IndexMap<K, Variable>,
}

impl<K: Eq + Hash + Clone> VarFamily<K> {
    fn new(name: &'static str, lower: f64, upper: f64, integer: bool) -> Self {
        Self {
            name,
            lower,
            upper,
            integer,
            vars: IndexMap::new(),
        }
    }

    /// A family of non-negative continuous variables
    fn non_negative(name: &'static str) -> Self {
        Self::new(name, 0.0, f64::INFINITY, false)
    }

    /// A family of non-negative integer variables
    fn non_negative_integer(name: &'static str) -> Self {
        Self::new(name, 0.0, f64::INFINITY, true)
    }

    /// Get the variable for `key`, adding it to the problem if needed
    fn get(&mut self, lp: &mut LinearProgram, key: K) -> Variable {
        let (name, lower, upper, integer) = (self.name, self.lower, self.upper, self.integer);
        *self
            .vars
            .entry(key)
            .or_insert_with(|| lp.add_variable(name, lower, upper, integer))
    }

    /// Name of the family
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up an existing variable
    pub fn lookup(&self, key: &K) -> Option<Variable> {
        self.vars.get(key).copied()
    }

    /// Iterate over the variables of the family and their keys
    pub fn iter(&self) -> impl Iterator<Item = (&K, Variable)> {
        self.vars.iter().map(|(key, var)| (key, *var))
    }

    /// The values of the family's variables in a solution, in order of creation
    pub fn values(&self, columns: &[f64]) -> IndexMap<K, f64> {
        self.iter()
            .map(|(key, var)| (key.clone(), columns[var.index()]))
            .collect()
    }
}

/// Index of per-year technology variables
pub type NodeTechYear = (NodeID, TechID, u32);
/// Index of technology flows of a settlement fuel
pub type TechFlow = (NodeID, TechID, FuelID, TimeStep);
/// Index of technology consumption of a fuel, settled as a settlement fuel
pub type TechConsumption = (NodeID, TechID, FuelID, FuelID, TimeStep);
/// Index of node flows of a settlement fuel
pub type NodeFlow = (NodeID, FuelID, TimeStep);
/// Index of node flows of a fuel, settled as a settlement fuel
pub type SettledFlow = (NodeID, FuelID, FuelID, TimeStep);

/// All decision variables of the problem
#[derive(Debug, Clone)]
pub struct Variables {
    /// Added capacity
    pub cap_add: VarFamily<NodeTechYear>,
    /// Retired capacity
    pub cap_sub: VarFamily<NodeTechYear>,
    /// Number of capacity units added
    pub unit_add: VarFamily<NodeTechYear>,
    /// Number of capacity units retired
    pub unit_sub: VarFamily<NodeTechYear>,
    /// Added storage volume
    pub storage_vol_add: VarFamily<NodeTechYear>,
    /// Retired storage volume
    pub storage_vol_sub: VarFamily<NodeTechYear>,
    /// Number of storage volume units added
    pub storage_unit_add: VarFamily<NodeTechYear>,
    /// Number of storage volume units retired
    pub storage_unit_sub: VarFamily<NodeTechYear>,
    /// Production (or storage discharge)
    pub f_prod: VarFamily<TechFlow>,
    /// Linear production proxy of the part-load curve
    pub f_prod_lin: VarFamily<TechFlow>,
    /// Production above the max-efficiency point
    pub f_prod_over_max_eff: VarFamily<TechFlow>,
    /// Production above the bend point
    pub f_prod_over_bend: VarFamily<TechFlow>,
    /// Consumption (or storage charge)
    pub f_cons: VarFamily<TechConsumption>,
    /// Imports
    pub f_import: VarFamily<NodeFlow>,
    /// Spot-market imports
    pub f_import_timeseries: VarFamily<NodeFlow>,
    /// Number of fixed-quantity deliveries
    pub f_fix_quant_import: VarFamily<NodeFlow>,
    /// Positive balance slack
    pub f_slack_pos: VarFamily<NodeFlow>,
    /// Negative balance slack
    pub f_slack_neg: VarFamily<NodeFlow>,
    /// Exports
    pub f_export: VarFamily<SettledFlow>,
    /// Spot-market exports
    pub f_export_timeseries: VarFamily<SettledFlow>,
    /// Delivery to exogenous demand
    pub f_delivery: VarFamily<SettledFlow>,
    /// Supply of constant system self-consumption
    pub f_supply_cons_system: VarFamily<SettledFlow>,
    /// Required network capacity
    pub f_network_capacity: VarFamily<(NodeID, FuelID, u32)>,
    /// Stored energy
    pub storage_level: VarFamily<TechFlow>,
    /// Stored energy before the first step
    pub start_storage_level: VarFamily<(NodeID, TechID, FuelID)>,
    /// Peak electricity demand
    pub peak_el_demand: VarFamily<(NodeID, u32)>,
    /// Peak of the variable (capacity-proportional) demand profiles
    pub peak_v_edp: VarFamily<(NodeID, u32)>,
    /// Peak of the fixed demand profiles
    pub peak_f_edp: VarFamily<(NodeID, u32)>,
    /// Peak of the exogenous electricity demand
    pub peak_demand_el: VarFamily<(NodeID, u32)>,
    /// Peak auxiliary electricity demand
    pub peak_aux_demand_el: VarFamily<(NodeID, u32)>,
}

impl Default for Variables {
    fn default() -> Self {
        let slack_neg = VarFamily::new("f_slack_neg", f64::NEG_INFINITY, 0.0, false);
        Self {
            cap_add: VarFamily::non_negative("cap_add"),
            cap_sub: VarFamily::non_negative("cap_sub"),
            unit_add: VarFamily::non_negative_integer("unit_add"),
            unit_sub: VarFamily::non_negative_integer("unit_sub"),
            storage_vol_add: VarFamily::non_negative("storage_vol_add"),
            storage_vol_sub: VarFamily::non_negative("storage_vol_sub"),
            storage_unit_add: VarFamily::non_negative_integer("storage_unit_add"),
            storage_unit_sub: VarFamily::non_negative_integer("storage_unit_sub"),
            f_prod: VarFamily::non_negative("f_prod"),
            f_prod_lin: VarFamily::non_negative("f_prod_lin"),
            f_prod_over_max_eff: VarFamily::non_negative("f_prod_over_max_eff"),
            f_prod_over_bend: VarFamily::non_negative("f_prod_over_bend"),
            f_cons: VarFamily::non_negative("f_cons"),
            f_import: VarFamily::non_negative("f_import"),
            f_import_timeseries: VarFamily::non_negative("f_import_timeseries"),
            f_fix_quant_import: VarFamily::non_negative_integer("f_fix_quant_import"),
            f_slack_pos: VarFamily::non_negative("f_slack_pos"),
            f_slack_neg: slack_neg,
            f_export: VarFamily::non_negative("f_export"),
            f_export_timeseries: VarFamily::non_negative("f_export_timeseries"),
            f_delivery: VarFamily::non_negative("f_delivery"),
            f_supply_cons_system: VarFamily::non_negative("f_supply_cons_system"),
            f_network_capacity: VarFamily::non_negative("f_network_capacity"),
            storage_level: VarFamily::non_negative("storage_energy_level"),
            start_storage_level: VarFamily::non_negative("start_storage_energy_level"),
            peak_el_demand: VarFamily::non_negative("peak_el_demand"),
            peak_v_edp: VarFamily::non_negative("peak_v_edp"),
            peak_f_edp: VarFamily::non_negative("peak_f_edp"),
            peak_demand_el: VarFamily::non_negative("peak_demand_el"),
            peak_aux_demand_el: VarFamily::non_negative("peak_aux_demand_el"),
        }
    }
}

/// A formulated problem along with what is needed to interpret its solution
#[derive(Debug, Clone)]
pub struct BuiltModel {
    /// The linear program
    pub lp: LinearProgram,
    /// Variables, by family and index
    pub variables: Variables,
    /// Annual cost and revenue streams as expressions of the variables
    pub costs: CostStreams<LinExpr>,
    /// Installed capacity of every technology at every node and year
    pub inst_cap: HashMap<NodeTechYear, LinExpr>,
    /// Installed volume of every storage at every node and year
    pub inst_storage_vol: HashMap<NodeTechYear, LinExpr>,
}

/// Keeps the state while formulating a problem
struct Builder<'a> {
    model: &'a Model,
    lp: LinearProgram,
    vars: Variables,
    inst_cap: HashMap<NodeTechYear, LinExpr>,
    inst_storage_vol: HashMap<NodeTechYear, LinExpr>,
}

/// Formulate the optimisation problem for a model.
///
/// # Returns
///
/// The formulated problem, or an error if the model's data are inconsistent (e.g. a storage without
/// a unique fuel) or a constraint is infeasible by construction.
pub fn build_model(model: &Model) -> Result<BuiltModel> {
    info!("Formulating optimisation problem");
    let mut builder = Builder {
        model,
        lp: LinearProgram::default(),
        vars: Variables::default(),
        inst_cap: HashMap::new(),
        inst_storage_vol: HashMap::new(),
    };

    debug!("Adding cost streams");
    let costs = builder.cost_streams()?;
    builder.lp.objective = costs
        .discounted(&model.discounting(), model.parameters.subsidy_capex)
        .total();

    debug!("Adding constraints");
    builder.add_constraints()?;

    info!(
        "Problem has {} variables ({} integer) and {} constraints ({} omitted)",
        builder.lp.variables.len(),
        builder.lp.num_integer(),
        builder.lp.rows.len(),
        builder.lp.omitted
    );

    Ok(BuiltModel {
        lp: builder.lp,
        variables: builder.vars,
        costs,
        inst_cap: builder.inst_cap,
        inst_storage_vol: builder.inst_storage_vol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, model};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn two_vars() -> (LinearProgram, Variable, Variable) {
        let mut lp = LinearProgram::default();
        let x = lp.add_variable("x", 0.0, f64::INFINITY, false);
        let y = lp.add_variable("y", 0.0, f64::INFINITY, false);
        (lp, x, y)
    }

    #[test]
    fn test_lin_expr_arithmetic() {
        let (_, x, y) = two_vars();
        let expr = (LinExpr::term(x, 2.0) + LinExpr::var(y) + LinExpr::constant(3.0)) * 2.0
            - LinExpr::term(y, 2.0);
        assert_eq!(expr.terms().collect::<Vec<_>>(), [(x, 4.0)]);
        assert_approx_eq!(f64, expr.evaluate(&[1.5, 100.0]), 12.0);
    }

    #[test]
    fn test_lin_expr_sum() {
        let (_, x, y) = two_vars();
        let expr: LinExpr = [LinExpr::var(x), LinExpr::var(y), LinExpr::var(x)]
            .into_iter()
            .sum();
        assert_approx_eq!(f64, expr.evaluate(&[1.0, 10.0]), 12.0);
        assert!(!expr.is_constant());
        assert!((expr.clone() - expr).is_constant());
    }

    #[rstest]
    #[case(1.0, Relation::Eq, 1.0, ConstraintOutcome::Omit)]
    #[case(1.0, Relation::Eq, 2.0, ConstraintOutcome::Infeasible)]
    #[case(1.0, Relation::Le, 2.0, ConstraintOutcome::Omit)]
    #[case(3.0, Relation::Le, 2.0, ConstraintOutcome::Infeasible)]
    #[case(3.0, Relation::Ge, 2.0, ConstraintOutcome::Omit)]
    fn test_constant_relations(
        #[case] lhs: f64,
        #[case] rel: Relation,
        #[case] rhs: f64,
        #[case] expected: ConstraintOutcome,
    ) {
        assert_eq!(
            ConstraintOutcome::relation(lhs.into(), rel, rhs.into()),
            expected
        );
    }

    #[test]
    fn test_cancelling_terms_are_omitted() {
        let (_, x, _) = two_vars();
        let lhs = LinExpr::var(x) + LinExpr::constant(5.0);
        let rhs = LinExpr::var(x) + LinExpr::constant(5.0);
        assert_eq!(
            ConstraintOutcome::relation(lhs, Relation::Eq, rhs),
            ConstraintOutcome::Omit
        );
    }

    #[test]
    fn test_relation_moves_constants() {
        let (_, x, y) = two_vars();
        // x + 2 <= y + 5  =>  x - y <= 3
        let outcome = ConstraintOutcome::relation(
            LinExpr::var(x) + LinExpr::constant(2.0),
            Relation::Le,
            LinExpr::var(y) + LinExpr::constant(5.0),
        );
        assert_eq!(
            outcome,
            ConstraintOutcome::Constraint(LinearConstraint {
                lower: f64::NEG_INFINITY,
                upper: 3.0,
                terms: vec![(x, 1.0), (y, -1.0)],
            })
        );
    }

    #[test]
    fn test_range() {
        let (_, x, _) = two_vars();
        assert_eq!(
            ConstraintOutcome::range(f64::NEG_INFINITY, x.into(), f64::INFINITY),
            ConstraintOutcome::Omit
        );
        assert_eq!(
            ConstraintOutcome::range(2.0, x.into(), 1.0),
            ConstraintOutcome::Infeasible
        );
        assert_eq!(
            ConstraintOutcome::range(1.0, LinExpr::var(x) + LinExpr::constant(1.0), 3.0),
            ConstraintOutcome::Constraint(LinearConstraint {
                lower: 0.0,
                upper: 2.0,
                terms: vec![(x, 1.0)],
            })
        );
    }

    #[test]
    fn test_add_constraint() {
        let (mut lp, x, _) = two_vars();
        lp.add_constraint("a", key!("N1", 2020), ConstraintOutcome::Omit)
            .unwrap();
        lp.add_constraint(
            "b",
            key!("N1", 2020),
            ConstraintOutcome::range(0.0, x.into(), 1.0),
        )
        .unwrap();
        assert_eq!(lp.omitted, 1);
        assert_eq!(lp.rows.len(), 1);
        assert_eq!(lp.rows[0].key, "N1, 2020");
        assert!(lp.rows[0].is_satisfied(&[0.5, 0.0], 1e-9));
        assert!(!lp.rows[0].is_satisfied(&[1.5, 0.0], 1e-9));

        assert_error!(
            lp.add_constraint("c", key!("N2"), ConstraintOutcome::Infeasible),
            "Constraint c[N2] is infeasible by construction"
        );
    }

    #[test]
    fn test_var_family_is_lazy() {
        let mut lp = LinearProgram::default();
        let mut family: VarFamily<u32> = VarFamily::non_negative("x");
        let first = family.get(&mut lp, 1);
        assert_eq!(family.get(&mut lp, 1), first);
        assert_eq!(lp.variables.len(), 1);
        assert!(family.lookup(&2).is_none());
        family.get(&mut lp, 2);
        assert_eq!(lp.variables.len(), 2);
        assert_eq!(family.values(&[3.0, 4.0])[&2], 4.0);
    }

    #[rstest]
    fn test_build_model(model: Model) {
        let built = build_model(&model).unwrap();
        assert!(!built.lp.rows.is_empty());
        assert_eq!(built.lp.rows_in("fuel_balance").count(), 1);
        assert_eq!(built.lp.rows_in("fuel_delivery").count(), 1);
        assert!(!built.lp.objective.is_constant());
    }
}
