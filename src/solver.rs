//! The solver adapter: hands a formulated [`LinearProgram`] to an external solver.
use crate::log::log_level_is_off;
use crate::model::parameters::SolverName;
use crate::optimisation::LinearProgram;
use highs::{HighsModelStatus, HighsStatus, RowProblem as Problem, Sense};
use log::info;
use std::fmt;

/// A solve which did not produce an optimal solution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelError {
    /// The solver rejected the problem or failed to run
    Incoherent(HighsStatus),
    /// The solver ran, but found no optimal solution (e.g. the problem is infeasible)
    NonOptimal(HighsModelStatus),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Incoherent(status) => write!(f, "Incoherent model: {status:?}"),
            ModelError::NonOptimal(status) => {
                write!(f, "Could not find optimal result for model: {status:?}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// An optimal solution
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Value of every variable, by column
    pub columns: Vec<f64>,
    /// Dual value of every constraint, by row
    pub duals: Vec<f64>,
    /// Value of the objective, including its constant part
    pub objective: f64,
}

/// A solver for linear programs
pub trait Solver {
    /// Minimise the problem's objective
    fn solve(&self, lp: &LinearProgram) -> Result<Solution, ModelError>;
}

/// The HiGHS solver
#[derive(Debug, Clone, Copy, Default)]
pub struct HighsSolver;

impl Solver for HighsSolver {
    fn solve(&self, lp: &LinearProgram) -> Result<Solution, ModelError> {
        let mut problem = Problem::default();
        let mut costs = vec![0.0; lp.variables.len()];
        for (var, coeff) in lp.objective.terms() {
            costs[var.index()] += coeff;
        }

        let cols: Vec<_> = lp
            .variables
            .iter()
            .zip(costs)
            .map(|(var, cost)| {
                if var.integer {
                    problem.add_integer_column(cost, var.lower..=var.upper)
                } else {
                    problem.add_column(cost, var.lower..=var.upper)
                }
            })
            .collect();

        for row in &lp.rows {
            let terms = row
                .constraint
                .terms
                .iter()
                .map(|(var, coeff)| (cols[var.index()], *coeff));
            problem.add_row(row.constraint.lower..=row.constraint.upper, terms);
        }

        let mut highs_model = problem.optimise(Sense::Minimise);
        enable_highs_logging(&mut highs_model);

        info!("Solving with HiGHS");
        let solved = highs_model.try_solve().map_err(ModelError::Incoherent)?;
        match solved.status() {
            HighsModelStatus::Optimal => {
                let solution = solved.get_solution();
                let columns = solution.columns().to_vec();
                Ok(Solution {
                    objective: lp.objective.evaluate(&columns),
                    duals: solution.dual_rows().to_vec(),
                    columns,
                })
            }
            status => Err(ModelError::NonOptimal(status)),
        }
    }
}

/// Enable logging for the HiGHS solver
fn enable_highs_logging(model: &mut highs::Model) {
    // Skip this step if logging is disabled (e.g. when running tests)
    if log_level_is_off() {
        return;
    }

    model.set_option("log_to_console", true);
    model.set_option("output_flag", true);
}

/// Get the solver with the given name
pub fn get_solver(name: SolverName) -> Box<dyn Solver> {
    match name {
        SolverName::Highs => Box::new(HighsSolver),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimisation::{ConstraintOutcome, LinExpr, LinearProgram};
    use float_cmp::assert_approx_eq;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::NonOptimal(HighsModelStatus::Infeasible);
        assert_eq!(
            err.to_string(),
            "Could not find optimal result for model: Infeasible"
        );
    }

    fn one_variable_problem(lower: f64, upper: f64) -> LinearProgram {
        let mut lp = LinearProgram::default();
        let x = lp.add_variable("x", 0.0, f64::INFINITY, false);
        lp.add_constraint(
            "limit",
            || "x".to_string(),
            ConstraintOutcome::range(lower, x.into(), upper),
        )
        .unwrap();
        lp.objective = LinExpr::var(x) + LinExpr::constant(1.0);
        lp
    }

    #[test]
    fn test_solve_optimal() {
        let solution = HighsSolver.solve(&one_variable_problem(2.0, 10.0)).unwrap();
        assert_approx_eq!(f64, solution.columns[0], 2.0, epsilon = 1e-9);
        assert_approx_eq!(f64, solution.objective, 3.0, epsilon = 1e-9);
        assert_eq!(solution.duals.len(), 1);
    }

    #[test]
    fn test_solve_infeasible() {
        let result = HighsSolver.solve(&one_variable_problem(f64::NEG_INFINITY, -1.0));
        assert!(matches!(result, Err(ModelError::NonOptimal(_))));
    }
}
