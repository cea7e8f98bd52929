//! Operation → concrete [`Case`] assembly

use std::collections::BTreeMap;

use rand::Rng;
use schemafuzz_core::case::Case;
use schemafuzz_core::schema::{Operation, Parameter, ParameterLocation};
use serde_json::Value;

use crate::strategy::{GenerationError, Strategy, UnsatisfiableSchema};

/// Inclusion probability of optional parameters and a non-required body.
const OPTIONAL_PARAMETER_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone)]
struct CompiledParameter {
    parameter: Parameter,
    strategy: Strategy,
}

impl CompiledParameter {
    /// Path parameters are always part of the request.
    fn is_required(&self) -> bool {
        self.parameter.required || self.parameter.location == ParameterLocation::Path
    }
}

/// Draws cases for one operation.
#[derive(Debug, Clone)]
pub struct CaseGenerator {
    operation: Operation,
    parameters: Vec<CompiledParameter>,
    static_headers: BTreeMap<String, String>,
}

impl CaseGenerator {
    /// Compile every parameter schema of `operation`.
    ///
    /// # Errors
    ///
    /// Propagates [`UnsatisfiableSchema`] from any parameter, prefixed with
    /// the parameter's location and name.
    pub fn new(
        operation: &Operation,
        static_headers: &BTreeMap<String, String>,
        boundary_bias: f64,
    ) -> Result<Self, UnsatisfiableSchema> {
        let mut parameters = Vec::with_capacity(operation.parameters.len());
        for parameter in &operation.parameters {
            let strategy = Strategy::build(&parameter.schema)
                .map_err(|e| {
                    UnsatisfiableSchema::new(format!(
                        "{} parameter {:?}: {}",
                        parameter.location, parameter.name, e.reason
                    ))
                })?
                .with_boundary_bias(boundary_bias);
            parameters.push(CompiledParameter {
                parameter: parameter.clone(),
                strategy,
            });
        }
        Ok(Self {
            operation: operation.clone(),
            parameters,
            static_headers: static_headers.clone(),
        })
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    fn empty_case(&self) -> Case {
        let mut case = Case::new(
            self.operation.method.clone(),
            self.operation.path.clone(),
            self.operation.base_url.clone(),
        );
        case.declared_statuses = self.operation.declared_statuses.clone();
        case
    }

    fn is_static_header(&self, param: &CompiledParameter) -> bool {
        param.parameter.location == ParameterLocation::Header
            && self
                .static_headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case(&param.parameter.name))
    }

    fn apply_static_headers(&self, case: &mut Case) {
        for (name, value) in &self.static_headers {
            case.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
            case.headers.insert(name.clone(), Value::String(value.clone()));
        }
    }

    /// Draw one case. Pure function of `rng`.
    ///
    /// # Errors
    ///
    /// Fails when a parameter value cannot be drawn (pattern or format
    /// strings that miss their length bounds).
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Case, GenerationError> {
        let mut case = self.empty_case();
        for param in &self.parameters {
            if param.is_required() || rng.gen_bool(OPTIONAL_PARAMETER_PROBABILITY) {
                let value = param.strategy.draw(rng)?;
                set_value(&mut case, &param.parameter, value);
            }
        }
        self.apply_static_headers(&mut case);
        Ok(case)
    }

    /// Case assembled from the documented examples. Parameters without an
    /// example are drawn; `None` when no parameter has an example.
    ///
    /// # Errors
    ///
    /// Fails when a parameter without an example cannot be drawn.
    pub fn explicit_case<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Option<Result<Case, GenerationError>> {
        if self.parameters.iter().all(|p| p.parameter.example.is_none()) {
            return None;
        }
        let mut case = self.empty_case();
        for param in &self.parameters {
            let value = match &param.parameter.example {
                Some(example) => example.clone(),
                None if param.is_required() => match param.strategy.draw(rng) {
                    Ok(value) => value,
                    Err(e) => return Some(Err(e)),
                },
                None => continue,
            };
            set_value(&mut case, &param.parameter, value);
        }
        self.apply_static_headers(&mut case);
        Some(Ok(case))
    }

    /// Whether every generated part of `case` satisfies its schema.
    #[must_use]
    pub fn accepts(&self, case: &Case) -> bool {
        self.parameters.iter().all(|param| {
            if self.is_static_header(param) {
                return true;
            }
            match get_value(case, &param.parameter) {
                Some(value) => param.strategy.accepts(value),
                None => !param.is_required(),
            }
        })
    }

    /// Cases one step simpler than `case`: each optional parameter dropped,
    /// then each parameter value replaced by one of its shrink candidates.
    /// Static headers are never touched.
    #[must_use]
    pub fn shrink(&self, case: &Case) -> Vec<Case> {
        let shrinkable: Vec<&CompiledParameter> = self
            .parameters
            .iter()
            .filter(|p| !self.is_static_header(p))
            .collect();

        let mut out = Vec::new();
        for param in &shrinkable {
            if !param.is_required() && get_value(case, &param.parameter).is_some() {
                let mut fewer = case.clone();
                fewer.seed = None;
                remove_value(&mut fewer, &param.parameter);
                out.push(fewer);
            }
        }
        for param in &shrinkable {
            let Some(value) = get_value(case, &param.parameter) else {
                continue;
            };
            for candidate in param.strategy.shrink(value) {
                let mut simpler = case.clone();
                simpler.seed = None;
                set_value(&mut simpler, &param.parameter, candidate);
                out.push(simpler);
            }
        }
        out
    }
}

fn get_value<'a>(case: &'a Case, parameter: &Parameter) -> Option<&'a Value> {
    match parameter.location {
        ParameterLocation::Path => case.path_parameters.get(&parameter.name),
        ParameterLocation::Query => case.query.get(&parameter.name),
        ParameterLocation::Header => case.headers.get(&parameter.name),
        ParameterLocation::Body => case.body.as_ref(),
    }
}

fn set_value(case: &mut Case, parameter: &Parameter, value: Value) {
    let name = parameter.name.clone();
    match parameter.location {
        ParameterLocation::Path => {
            case.path_parameters.insert(name, value);
        }
        ParameterLocation::Query => {
            case.query.insert(name, value);
        }
        ParameterLocation::Header => {
            case.headers.insert(name, value);
        }
        ParameterLocation::Body => case.body = Some(value),
    }
}

fn remove_value(case: &mut Case, parameter: &Parameter) {
    match parameter.location {
        ParameterLocation::Path => {
            case.path_parameters.remove(&parameter.name);
        }
        ParameterLocation::Query => {
            case.query.remove(&parameter.name);
        }
        ParameterLocation::Header => {
            case.headers.remove(&parameter.name);
        }
        ParameterLocation::Body => case.body = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use schemafuzz_core::schema::{
        ObjectConstraints, ParameterSchema, Property, StringConstraints,
    };
    use serde_json::json;

    fn users_operation() -> Operation {
        Operation::new("post", "/users/{user_id}", "http://localhost:8080")
            .with_parameter(Parameter::new(
                "user_id",
                ParameterLocation::Path,
                false,
                ParameterSchema::integer_range(1, 1000),
            ))
            .with_parameter(Parameter::new(
                "limit",
                ParameterLocation::Query,
                false,
                ParameterSchema::integer_range(1, 50),
            ))
            .with_parameter(Parameter::new(
                "X-Request-Id",
                ParameterLocation::Header,
                true,
                ParameterSchema::String(StringConstraints {
                    min_length: 1,
                    max_length: Some(8),
                    ..StringConstraints::default()
                }),
            ))
            .with_parameter(Parameter::new(
                "body",
                ParameterLocation::Body,
                true,
                ParameterSchema::Object(ObjectConstraints {
                    properties: vec![Property {
                        name: "name".into(),
                        schema: ParameterSchema::string(),
                    }],
                    required: vec!["name".into()],
                    additional_properties: false,
                }),
            ))
    }

    fn generator(headers: &[(&str, &str)]) -> CaseGenerator {
        let headers = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CaseGenerator::new(&users_operation(), &headers, 0.2).unwrap()
    }

    #[test]
    fn generated_cases_are_valid() {
        let generator = generator(&[]);
        let mut rng = SmallRng::seed_from_u64(1);
        let mut saw_limit = false;
        for _ in 0..100 {
            let case = generator.generate(&mut rng).unwrap();
            assert!(generator.accepts(&case));
            assert!(case.path_parameters.contains_key("user_id"));
            assert!(case.headers.contains_key("X-Request-Id"));
            assert!(case.body.is_some());
            saw_limit |= case.query.contains_key("limit");
        }
        assert!(saw_limit);
    }

    #[test]
    fn same_seed_same_case() {
        let generator = generator(&[]);
        let a = generator.generate(&mut SmallRng::seed_from_u64(77)).unwrap();
        let b = generator.generate(&mut SmallRng::seed_from_u64(77)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn static_headers_override_generated_ones() {
        let generator = generator(&[("x-request-id", "fixed"), ("Authorization", "Bearer t")]);
        let case = generator.generate(&mut SmallRng::seed_from_u64(3)).unwrap();
        assert_eq!(case.headers.get("x-request-id"), Some(&json!("fixed")));
        assert!(!case.headers.contains_key("X-Request-Id"));
        assert_eq!(case.headers.get("Authorization"), Some(&json!("Bearer t")));

        for candidate in generator.shrink(&case) {
            assert_eq!(candidate.headers.get("x-request-id"), Some(&json!("fixed")));
            assert_eq!(candidate.headers.get("Authorization"), Some(&json!("Bearer t")));
        }
    }

    #[test]
    fn shrink_drops_optional_parameters_first() {
        let generator = generator(&[]);
        let mut case = generator.empty_case();
        case.path_parameters.insert("user_id".into(), json!(500));
        case.query.insert("limit".into(), json!(20));
        case.headers.insert("X-Request-Id".into(), json!("abc"));
        case.body = Some(json!({"name": "bob"}));
        case.seed = Some(4);

        let candidates = generator.shrink(&case);
        assert!(!candidates[0].query.contains_key("limit"));
        assert!(candidates.iter().all(|c| c.seed.is_none()));
        assert!(candidates.iter().all(|c| c.path_parameters.contains_key("user_id")));
        assert!(candidates.iter().all(|c| generator.accepts(c)));
    }

    #[test]
    fn explicit_case_uses_examples() {
        let operation = Operation::new("get", "/items", "http://localhost")
            .with_parameter(
                Parameter::new("q", ParameterLocation::Query, false, ParameterSchema::string())
                    .with_example(json!("shoes")),
            )
            .with_parameter(Parameter::new(
                "page",
                ParameterLocation::Query,
                true,
                ParameterSchema::integer_range(1, 1),
            ))
            .with_parameter(Parameter::new(
                "debug",
                ParameterLocation::Query,
                false,
                ParameterSchema::Boolean,
            ));
        let generator = CaseGenerator::new(&operation, &BTreeMap::new(), 0.2).unwrap();
        let case = generator
            .explicit_case(&mut SmallRng::seed_from_u64(0))
            .unwrap()
            .unwrap();
        assert_eq!(case.query.get("q"), Some(&json!("shoes")));
        assert_eq!(case.query.get("page"), Some(&json!(1)));
        assert!(!case.query.contains_key("debug"));
    }

    #[test]
    fn no_examples_no_explicit_case() {
        assert!(generator(&[]).explicit_case(&mut SmallRng::seed_from_u64(0)).is_none());
    }

    #[test]
    fn unsatisfiable_parameter_names_location() {
        let operation = Operation::new("get", "/x", "http://localhost").with_parameter(
            Parameter::new(
                "n",
                ParameterLocation::Query,
                true,
                ParameterSchema::integer_range(5, 1),
            ),
        );
        let err = CaseGenerator::new(&operation, &BTreeMap::new(), 0.2).unwrap_err();
        assert!(err.reason.starts_with("query parameter \"n\""), "{}", err.reason);
    }
}
