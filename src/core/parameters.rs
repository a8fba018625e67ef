//! Typed job parameters, their canonical identity key and the per-job schema.
//!
//! Identifying parameters decide which [`JobInstance`](super::execution::JobInstance)
//! a launch belongs to: two launches with the same identifying parameters are
//! the same instance, whatever their non-identifying parameters are.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Type of a job parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Long,
    Date,
    Double,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::String => "STRING",
            ParameterType::Long => "LONG",
            ParameterType::Date => "DATE",
            ParameterType::Double => "DOUBLE",
        };
        f.write_str(name)
    }
}

/// Value of a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Date(DateTime<Utc>),
    Double(f64),
}

impl ParameterValue {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::Long(_) => ParameterType::Long,
            ParameterValue::Date(_) => ParameterType::Date,
            ParameterValue::Double(_) => ParameterType::Double,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}", value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => write!(f, "{}", value.to_rfc3339()),
            ParameterValue::Double(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Parameters supplied when a job is launched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name).map(|parameter| &parameter.value) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name).map(|parameter| &parameter.value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name).map(|parameter| &parameter.value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name).map(|parameter| &parameter.value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Only the identifying parameters.
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, parameter)| parameter.identifying)
                .map(|(name, parameter)| (name.clone(), parameter.clone()))
                .collect(),
        }
    }

    /// Canonical identity key built from the identifying parameters, sorted by name.
    ///
    /// The format is `name=value(TYPE)` joined with `;`, e.g.
    /// `file=person.csv(STRING);run.id=3(LONG)`.
    pub fn job_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(name, parameter)| {
                format!(
                    "{}={}({})",
                    name,
                    parameter.value,
                    parameter.value.parameter_type()
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Returns a copy of `self` overridden by every entry of `other`.
    pub fn merge(&self, other: &JobParameters) -> JobParameters {
        let mut parameters = self.parameters.clone();
        for (name, parameter) in &other.parameters {
            parameters.insert(name.clone(), parameter.clone());
        }
        JobParameters { parameters }
    }
}

/// Fluent construction of [`JobParameters`].
///
/// ```
/// use chunked_batch::core::parameters::JobParametersBuilder;
///
/// let parameters = JobParametersBuilder::new()
///     .add_string("input.file", "person.csv")
///     .add_long("chunk.size", 200)
///     .add_string_non_identifying("triggered.by", "cron")
///     .build();
///
/// assert_eq!(
///     parameters.job_key(),
///     "chunk.size=200(LONG);input.file=person.csv(STRING)"
/// );
/// ```
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing parameters.
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add(mut self, name: &str, value: ParameterValue, identifying: bool) -> Self {
        self.parameters.insert(
            name.to_string(),
            JobParameter { value, identifying },
        );
        self
    }

    pub fn add_string(self, name: &str, value: &str) -> Self {
        self.add(name, ParameterValue::String(value.to_string()), true)
    }

    pub fn add_string_non_identifying(self, name: &str, value: &str) -> Self {
        self.add(name, ParameterValue::String(value.to_string()), false)
    }

    pub fn add_long(self, name: &str, value: i64) -> Self {
        self.add(name, ParameterValue::Long(value), true)
    }

    pub fn add_long_non_identifying(self, name: &str, value: i64) -> Self {
        self.add(name, ParameterValue::Long(value), false)
    }

    pub fn add_date(self, name: &str, value: DateTime<Utc>) -> Self {
        self.add(name, ParameterValue::Date(value), true)
    }

    pub fn add_double(self, name: &str, value: f64) -> Self {
        self.add(name, ParameterValue::Double(value), true)
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Declaration of one parameter a job accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub parameter_type: ParameterType,
    pub required: bool,
}

/// The set of named, typed parameters a job accepts.
///
/// Parameters that are not declared are accepted unless
/// [`deny_unknown`](Self::deny_unknown) is set.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    definitions: Vec<ParameterDefinition>,
    deny_unknown: bool,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, parameter_type: ParameterType) -> Self {
        self.definitions.push(ParameterDefinition {
            name: name.to_string(),
            parameter_type,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, parameter_type: ParameterType) -> Self {
        self.definitions.push(ParameterDefinition {
            name: name.to_string(),
            parameter_type,
            required: false,
        });
        self
    }

    pub fn deny_unknown(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    /// Checks presence of required parameters and the type of every declared one.
    pub fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        for definition in &self.definitions {
            match parameters.get(&definition.name) {
                None if definition.required => {
                    return Err(BatchError::InvalidJobParameters(format!(
                        "missing required parameter {}",
                        definition.name
                    )));
                }
                Some(parameter) if parameter.value.parameter_type() != definition.parameter_type => {
                    return Err(BatchError::InvalidJobParameters(format!(
                        "parameter {} must be of type {}, got {}",
                        definition.name,
                        definition.parameter_type,
                        parameter.value.parameter_type()
                    )));
                }
                _ => {}
            }
        }

        if self.deny_unknown {
            if let Some((name, _)) = parameters
                .iter()
                .find(|(name, _)| !self.definitions.iter().any(|d| &d.name == *name))
            {
                return Err(BatchError::InvalidJobParameters(format!(
                    "unknown parameter {}",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Derives the parameters of the next job instance from the previous instance's parameters.
pub trait JobParametersIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a `run.id` long parameter so that every launch is a new instance.
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub const DEFAULT_KEY: &'static str = "run.id";

    pub fn new() -> Self {
        Self {
            key: Self::DEFAULT_KEY.to_string(),
        }
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let previous = previous.cloned().unwrap_or_default();
        let id = previous.get_long(&self.key).unwrap_or(0) + 1;
        JobParametersBuilder::from_parameters(&previous)
            .add_long(&self.key, id)
            .build()
    }
}
