use taskgrid::Task;

use crate::common::error::error;
use crate::config::{BindingDef, ParamDef, RangeDef, SweepDef};

/// One combination of parameter values, in declaration order.
pub type SweepPoint = Vec<(String, String)>;

pub fn param_values(param: &ParamDef) -> crate::Result<Vec<String>> {
    match (&param.values, &param.range) {
        (Some(values), None) => values
            .iter()
            .map(|value| value_to_string(&param.name, value))
            .collect(),
        (None, Some(range)) => range_values(&param.name, range),
        (Some(_), Some(_)) => error(format!(
            "Parameter `{}` cannot have both `values` and `range`",
            param.name
        )),
        (None, None) => error(format!(
            "Parameter `{}` needs either `values` or `range`",
            param.name
        )),
    }
}

fn value_to_string(name: &str, value: &toml::Value) -> crate::Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        other => error(format!(
            "Parameter `{name}` has unsupported value `{other}`"
        )),
    }
}

fn range_values(name: &str, range: &RangeDef) -> crate::Result<Vec<String>> {
    if range.step <= 0 {
        return error(format!("Parameter `{name}` needs a positive range step"));
    }
    if range.divisor == Some(0) {
        return error(format!("Parameter `{name}` has zero range divisor"));
    }
    let values = (range.start..range.stop)
        .step_by(range.step as usize)
        .map(|value| match range.divisor {
            Some(divisor) => (value as f64 / divisor as f64).to_string(),
            None => value.to_string(),
        })
        .collect();
    Ok(values)
}

/// Cartesian product of all parameters; the first parameter varies slowest.
pub fn expand_points(params: &[ParamDef]) -> crate::Result<Vec<SweepPoint>> {
    let mut names = Vec::with_capacity(params.len());
    for param in params {
        if names.contains(&param.name.as_str()) {
            return error(format!("Parameter `{}` is defined more than once", param.name));
        }
        names.push(param.name.as_str());
    }

    let mut points: Vec<SweepPoint> = vec![Vec::new()];
    for param in params {
        let values = param_values(param)?;
        points = points
            .into_iter()
            .flat_map(|point| {
                values.iter().map(move |value| {
                    let mut point = point.clone();
                    point.push((param.name.clone(), value.clone()));
                    point
                })
            })
            .collect();
    }
    Ok(points)
}

/// Replaces every `{name}` placeholder by its value in the point.
pub fn substitute(template: &str, point: &[(String, String)]) -> String {
    point
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
}

pub fn point_tag(point: &[(String, String)]) -> String {
    point
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_tasks(sweep: &SweepDef) -> crate::Result<Vec<Task>> {
    let points = expand_points(&sweep.params)?;
    let tasks = points
        .iter()
        .map(|point| build_task(sweep, point))
        .collect();
    Ok(tasks)
}

fn build_task(sweep: &SweepDef, point: &[(String, String)]) -> Task {
    let mut task = Task::new(substitute(&sweep.command, point));
    if let Some(category) = &sweep.category {
        task = task.with_category(category.as_str());
    }
    if !point.is_empty() {
        task = task.with_tag(point_tag(point));
    }
    task.requested.cores = sweep.cores;
    task.requested.memory = sweep.memory;
    task.requested.disk = sweep.disk;
    task.requested.gpus = sweep.gpus;

    let bind = |binding: &BindingDef| {
        (
            substitute(&binding.source, point),
            substitute(&binding.target, point),
            binding.cache,
        )
    };
    for (source, target, cache) in sweep.inputs.iter().map(bind) {
        task = task.with_input(source, target, cache);
    }
    for (source, target, cache) in sweep.outputs.iter().map(bind) {
        task = task.with_output(source, target, cache);
    }
    task
}
