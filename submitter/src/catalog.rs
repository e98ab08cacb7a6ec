// Tareas de demostración que declara el submitter.

use anyhow::anyhow;
use common::{
    options, BoundArgs, ConfigurationError, DataTransformation, ExecutionContext, MpiParallel,
    Options, PlainTask, ResourceConstraint, TaskDeclaration, TransformSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const MODULE: &str = "catalog";

pub struct Catalog {
    pub increment: TaskDeclaration,
    pub solve: TaskDeclaration,
    pub scale: TaskDeclaration,
}

fn square(value: Value, _opts: &Options) -> anyhow::Result<Value> {
    let n = value
        .as_i64()
        .ok_or_else(|| anyhow!("square: se esperaba un entero, llegó {}", value))?;
    Ok(json!(n * n))
}

fn solve_grid(args: &BoundArgs<'_>) -> anyhow::Result<Value> {
    let grid = args
        .require("grid")?
        .as_array()
        .ok_or_else(|| anyhow!("grid debe ser una lista"))?;
    let iterations = args.i64("iterations")?;
    let total: i64 = grid.iter().filter_map(Value::as_i64).sum();
    Ok(json!(total * iterations))
}

impl Catalog {
    pub fn declare(context: &Arc<ExecutionContext>) -> Result<Self, ConfigurationError> {
        // @constraint(computing_units=2) sobre @task
        let increment = TaskDeclaration::builder("increment")
            .module(MODULE)
            .param("value")
            .layer(ResourceConstraint::from_options(&options(json!({
                "computingUnits": 2,
                "memory_size": 1,
            })))?)
            .layer(PlainTask::new())
            .context(context.clone())
            .build(|args| Ok(json!(args.i64("value")? + 1)))?;

        // @mpi con layout de colección sobre `grid`
        let solve = TaskDeclaration::builder("solve")
            .module(MODULE)
            .param("grid")
            .param_with_default("iterations", json!(10))
            .layer(MpiParallel::from_options(&options(json!({
                "runner": "mpirun",
                "processes": 4,
                "working_dir": "/tmp",
                "fail_by_exit_value": true,
                "grid_layout": {"block_count": 2, "block_length": 2, "stride": 2},
            })))?)
            .layer(PlainTask::new())
            .context(context.clone())
            .build(solve_grid)?;

        // @data_transformation("x", square) sobre @task
        let scale = TaskDeclaration::builder("scale")
            .module(MODULE)
            .param("x")
            .param_with_default("factor", json!(3))
            .layer(DataTransformation::from_spec(TransformSpec::new("x", square)))
            .layer(PlainTask::new().io(false))
            .context(context.clone())
            .build(|args| Ok(json!(args.i64("x")? * args.i64("factor")?)))?;

        Ok(Self {
            increment,
            solve,
            scale,
        })
    }

    pub fn all(&self) -> [&TaskDeclaration; 3] {
        [&self.increment, &self.solve, &self.scale]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Args, ImplementationType, LocalEngine};

    fn catalog(role_submitter: bool) -> (Catalog, Arc<LocalEngine>) {
        let ctx = Arc::new(ExecutionContext::new());
        let engine = Arc::new(LocalEngine::new());
        if role_submitter {
            ctx.start_submitter(engine.clone()).unwrap();
        }
        (Catalog::declare(&ctx).unwrap(), engine)
    }

    #[test]
    fn submitter_runs_and_registers_every_task() {
        let (c, engine) = catalog(true);

        for _ in 0..2 {
            assert_eq!(c.increment.call(Args::from_positional([json!(4)])).unwrap(), json!(5));
            assert_eq!(
                c.solve.call(Args::from_positional([json!([1, 2, 3])])).unwrap(),
                json!(60)
            );
            // 4 -> square -> 16 * 3
            assert_eq!(c.scale.call(Args::from_positional([json!(4)])).unwrap(), json!(48));
        }

        for task in c.all() {
            assert_eq!(engine.registration_count(&task.signature()), 1);
            assert_eq!(engine.submissions(&task.signature()), 2);
        }
        assert_eq!(engine.registration_count("catalog.scale.x_transform"), 1);

        let solve = c.solve.descriptor().unwrap();
        assert_eq!(solve.implementation_type(), Some(ImplementationType::PythonMpi));
        assert_eq!(&solve.implementation_args().unwrap()[6..], ["grid", "2", "2", "2"]);

        let inc = c.increment.descriptor().unwrap();
        let constraints = inc.constraints().unwrap();
        assert_eq!(constraints.get("computing_units").unwrap(), "2");
        assert_eq!(constraints.get("memory_size").unwrap(), "1");
    }

    #[test]
    fn outside_the_runtime_the_bodies_run_unchanged() {
        let (c, engine) = catalog(false);

        assert_eq!(c.increment.call(Args::new().arg(json!(4))).unwrap(), json!(5));
        // sin transformación: 4 * 3
        assert_eq!(c.scale.call(Args::from_positional([json!(4)])).unwrap(), json!(12));
        assert!(engine.registrations().is_empty());
    }
}
