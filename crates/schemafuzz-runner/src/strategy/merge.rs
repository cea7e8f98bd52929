//! `allOf` intersection of compiled nodes

use schemafuzz_core::schema::ParameterSchema;
use serde_json::Value;

use super::{
    ArrayNode, FloatRange, IntRange, Node, ObjectNode, StringNode, UnsatisfiableSchema,
    build_node, is_multiple,
};

/// Multipliers tried when looking for a common float multiple.
const COMMON_MULTIPLE_SEARCH: u32 = 1000;

pub(super) fn all_of(schemas: &[ParameterSchema]) -> Result<Node, UnsatisfiableSchema> {
    let mut merged = Node::Any;
    for schema in schemas {
        merged = intersect(merged, build_node(schema)?)?;
    }
    Ok(merged)
}

fn intersect(a: Node, b: Node) -> Result<Node, UnsatisfiableSchema> {
    match (a, b) {
        (Node::Any, other) | (other, Node::Any) => Ok(other),
        (Node::Enum(values), other) | (other, Node::Enum(values)) => {
            let kept: Vec<Value> = values.into_iter().filter(|v| other.accepts(v)).collect();
            if kept.is_empty() {
                return Err(UnsatisfiableSchema::new(
                    "no enum value satisfies every allOf member",
                ));
            }
            Ok(Node::Enum(kept))
        }
        // A value inside `other` matches a narrowed variant exactly when it
        // matches the original one, so oneOf exclusivity carries over
        (Node::OneOf(variants), other) | (other, Node::OneOf(variants)) => {
            distribute(variants, &other, "oneOf").map(Node::OneOf)
        }
        (Node::AnyOf(variants), other) | (other, Node::AnyOf(variants)) => {
            distribute(variants, &other, "anyOf").map(Node::AnyOf)
        }
        (Node::Null, Node::Null) => Ok(Node::Null),
        (Node::Boolean, Node::Boolean) => Ok(Node::Boolean),
        (Node::Integer(a), Node::Integer(b)) => a.intersect(&b).map(Node::Integer),
        (Node::Integer(i), Node::Number(f)) | (Node::Number(f), Node::Integer(i)) => {
            i.within(&f).map(Node::Integer)
        }
        (Node::Number(a), Node::Number(b)) => a.intersect(&b).map(Node::Number),
        (Node::String(a), Node::String(b)) => a.intersect(*b).map(|s| Node::String(Box::new(s))),
        (Node::Array(a), Node::Array(b)) => {
            let a = *a;
            let b = *b;
            let items = match (a.items, b.items) {
                (Some(x), Some(y)) => intersect(x, y).ok(),
                _ => None,
            };
            ArrayNode::new(
                items,
                a.min.max(b.min),
                tighter(a.max, b.max, u64::min),
            )
            .map(|n| Node::Array(Box::new(n)))
        }
        (Node::Object(a), Node::Object(b)) => a.intersect(b).map(Node::Object),
        (a, b) => Err(UnsatisfiableSchema::new(format!(
            "allOf requires both {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn distribute(
    variants: Vec<Node>,
    other: &Node,
    keyword: &str,
) -> Result<Vec<Node>, UnsatisfiableSchema> {
    let kept: Vec<Node> = variants
        .into_iter()
        .filter_map(|v| intersect(v, other.clone()).ok())
        .collect();
    if kept.is_empty() {
        return Err(UnsatisfiableSchema::new(format!(
            "no {keyword} variant satisfies every allOf member"
        )));
    }
    Ok(kept)
}

fn tighter<T: Copy>(a: Option<T>, b: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, y) => x.or(y),
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl IntRange {
    fn intersect(&self, other: &Self) -> Result<Self, UnsatisfiableSchema> {
        let step = (self.step / gcd(self.step, other.step))
            .checked_mul(other.step)
            .ok_or_else(|| {
                UnsatisfiableSchema::new(format!(
                    "multipleOf {} and {} have no representable common multiple",
                    self.step, other.step
                ))
            })?;
        Self::new(
            tighter(self.min, other.min, i64::max),
            tighter(self.max, other.max, i64::min),
            Some(step),
        )
    }

    /// Integers inside a floating point range.
    #[allow(clippy::cast_possible_truncation)]
    fn within(&self, range: &FloatRange) -> Result<Self, UnsatisfiableSchema> {
        // Float to int casts saturate at the i64 limits
        let min = range.first.map(|m| m.ceil() as i64);
        let max = range.last.map(|m| m.floor() as i64);
        let step = range.multiple_of.map(integer_step).transpose()?;
        self.intersect(&Self::new(min, max, step)?)
    }
}

/// Smallest positive integer that is a multiple of `m`.
#[allow(clippy::cast_possible_truncation)]
fn integer_step(m: f64) -> Result<i64, UnsatisfiableSchema> {
    if m.fract() == 0.0 && m < 9.0e18 {
        return Ok(m as i64);
    }
    (1..=COMMON_MULTIPLE_SEARCH)
        .find(|n| is_multiple(f64::from(*n), m))
        .map(i64::from)
        .ok_or_else(|| UnsatisfiableSchema::new(format!("no integer is a multiple of {m}")))
}

/// Smallest common multiple of two float divisors, when one is found.
fn common_multiple(a: f64, b: f64) -> Result<f64, UnsatisfiableSchema> {
    let (small, large) = if a < b { (a, b) } else { (b, a) };
    (1..=COMMON_MULTIPLE_SEARCH)
        .map(|n| f64::from(n) * large)
        .find(|c| is_multiple(*c, small))
        .ok_or_else(|| {
            UnsatisfiableSchema::new(format!("multipleOf {a} and {b} have no common multiple"))
        })
}

impl FloatRange {
    fn intersect(&self, other: &Self) -> Result<Self, UnsatisfiableSchema> {
        let (min, exclusive_min) = match (self.min, other.min) {
            (Some(a), Some(b)) if a > b => (Some(a), self.exclusive_min),
            (Some(a), Some(b)) if b > a => (Some(b), other.exclusive_min),
            (Some(a), Some(_)) => (Some(a), self.exclusive_min || other.exclusive_min),
            (Some(a), None) => (Some(a), self.exclusive_min),
            (None, b) => (b, other.exclusive_min),
        };
        let (max, exclusive_max) = match (self.max, other.max) {
            (Some(a), Some(b)) if a < b => (Some(a), self.exclusive_max),
            (Some(a), Some(b)) if b < a => (Some(b), other.exclusive_max),
            (Some(a), Some(_)) => (Some(a), self.exclusive_max || other.exclusive_max),
            (Some(a), None) => (Some(a), self.exclusive_max),
            (None, b) => (b, other.exclusive_max),
        };
        let multiple_of = match (self.multiple_of, other.multiple_of) {
            (Some(a), Some(b)) => Some(common_multiple(a, b)?),
            (a, b) => a.or(b),
        };
        Self::new(min, max, exclusive_min, exclusive_max, multiple_of)
    }
}

impl StringNode {
    fn intersect(self, other: Self) -> Result<Self, UnsatisfiableSchema> {
        let format = match (self.format, other.format) {
            (Some(a), Some(b)) if a != b => {
                return Err(UnsatisfiableSchema::new(format!(
                    "allOf requires both {} and {} formats",
                    a.name(),
                    b.name()
                )));
            }
            (a, b) => a.or(b),
        };
        let mut extra_patterns = self.extra_patterns;
        extra_patterns.extend(other.extra_patterns);
        let pattern = match (self.pattern, other.pattern) {
            (Some(a), Some(b)) => {
                if a.source() != b.source() {
                    extra_patterns.push(b);
                }
                Some(a)
            }
            (a, b) => a.or(b),
        };
        Self::new(
            self.min_len.max(other.min_len),
            tighter(self.max_len, other.max_len, u64::min),
            format,
            pattern,
            extra_patterns,
        )
    }
}

impl ObjectNode {
    fn intersect(self, other: Self) -> Result<Self, UnsatisfiableSchema> {
        let mut props = self.props;
        for incoming in other.props {
            let Some(existing) = props.iter_mut().find(|p| p.name == incoming.name) else {
                props.push(incoming);
                continue;
            };
            existing.required |= incoming.required;
            existing.node = match (existing.node.take(), incoming.node) {
                (Some(x), Some(y)) => intersect(x, y).ok(),
                _ => None,
            };
            if existing.required && existing.node.is_none() {
                return Err(UnsatisfiableSchema::new(format!(
                    "required property {:?} cannot satisfy every allOf member",
                    existing.name
                )));
            }
        }
        Ok(Self {
            props,
            additional: self.additional && other.additional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::Strategy;
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use schemafuzz_core::schema::{
        IntegerConstraints, NumberConstraints, ObjectConstraints, Property, StringConstraints,
    };
    use serde_json::json;

    fn all_of(schemas: Vec<ParameterSchema>) -> ParameterSchema {
        ParameterSchema::AllOf { schemas }
    }

    #[test]
    fn integer_bounds_and_multiples_combine() {
        let schema = all_of(vec![
            ParameterSchema::Integer(IntegerConstraints {
                minimum: Some(0),
                multiple_of: Some(4),
                ..IntegerConstraints::default()
            }),
            ParameterSchema::Integer(IntegerConstraints {
                maximum: Some(50),
                multiple_of: Some(6),
                ..IntegerConstraints::default()
            }),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..100 {
            let v = strategy.draw(&mut rng).unwrap().as_i64().unwrap();
            assert!((0..=50).contains(&v) && v % 12 == 0, "{v}");
        }
    }

    #[test]
    fn integer_and_number_narrow_to_integer() {
        let schema = all_of(vec![
            ParameterSchema::integer(),
            ParameterSchema::Number(NumberConstraints {
                minimum: Some(0.5),
                maximum: Some(2.0),
                exclusive_maximum: true,
                ..NumberConstraints::default()
            }),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        assert!(strategy.accepts(&json!(1)));
        assert!(!strategy.accepts(&json!(2)));
        assert!(!strategy.accepts(&json!(0)));
    }

    #[test]
    fn enum_is_filtered_by_other_members() {
        let schema = all_of(vec![
            ParameterSchema::Enum {
                values: vec![json!(1), json!(5), json!("x")],
            },
            ParameterSchema::integer_range(2, 9),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        assert_eq!(strategy.draw(&mut SmallRng::seed_from_u64(0)).unwrap(), json!(5));

        let none_left = all_of(vec![
            ParameterSchema::Enum {
                values: vec![json!("x")],
            },
            ParameterSchema::integer(),
        ]);
        assert!(Strategy::build(&none_left).is_err());
    }

    #[test]
    fn string_patterns_accumulate() {
        let schema = all_of(vec![
            ParameterSchema::String(StringConstraints {
                pattern: Some("^[a-z]+$".into()),
                ..StringConstraints::default()
            }),
            ParameterSchema::String(StringConstraints {
                pattern: Some("q".into()),
                max_length: Some(6),
                ..StringConstraints::default()
            }),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        assert!(strategy.accepts(&json!("aqa")));
        assert!(!strategy.accepts(&json!("abc")));
        assert!(!strategy.accepts(&json!("aaaaaqa")));
    }

    #[test]
    fn objects_merge_properties() {
        let left = ParameterSchema::Object(ObjectConstraints {
            properties: vec![Property {
                name: "id".into(),
                schema: ParameterSchema::integer(),
            }],
            required: vec!["id".into()],
            additional_properties: true,
        });
        let right = ParameterSchema::Object(ObjectConstraints {
            properties: vec![
                Property {
                    name: "id".into(),
                    schema: ParameterSchema::integer_range(1, 3),
                },
                Property {
                    name: "tag".into(),
                    schema: ParameterSchema::string(),
                },
            ],
            required: vec!["tag".into()],
            additional_properties: false,
        });
        let strategy = Strategy::build(&all_of(vec![left, right])).unwrap();
        assert!(strategy.accepts(&json!({"id": 2, "tag": "x"})));
        assert!(!strategy.accepts(&json!({"id": 7, "tag": "x"})));
        assert!(!strategy.accepts(&json!({"id": 2})));
        assert!(!strategy.accepts(&json!({"id": 2, "tag": "x", "more": 1})));
    }

    #[test]
    fn one_of_is_distributed() {
        let schema = all_of(vec![
            ParameterSchema::OneOf {
                variants: vec![ParameterSchema::string(), ParameterSchema::integer()],
            },
            ParameterSchema::integer_range(0, 1),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        assert!(strategy.accepts(&json!(1)));
        assert!(!strategy.accepts(&json!("a")));
    }

    #[test]
    fn one_of_stays_exclusive_after_narrowing() {
        let schema = all_of(vec![
            ParameterSchema::OneOf {
                variants: vec![
                    ParameterSchema::integer_range(0, 10),
                    ParameterSchema::integer_range(5, 20),
                ],
            },
            ParameterSchema::integer_range(0, 8),
        ]);
        let strategy = Strategy::build(&schema).unwrap();
        assert!(strategy.accepts(&json!(3)));
        assert!(!strategy.accepts(&json!(6)));
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..100 {
            let v = strategy.draw(&mut rng).unwrap().as_i64().unwrap();
            assert!((0..5).contains(&v), "{v}");
        }
    }

    #[test]
    fn number_multiples_combine() {
        let multiple = |m: f64| {
            ParameterSchema::Number(NumberConstraints {
                minimum: Some(0.0),
                maximum: Some(10.0),
                multiple_of: Some(m),
                ..NumberConstraints::default()
            })
        };
        let strategy = Strategy::build(&all_of(vec![multiple(0.5), multiple(0.75)])).unwrap();
        assert!(strategy.accepts(&json!(1.5)));
        assert!(!strategy.accepts(&json!(0.75)));
        assert!(!strategy.accepts(&json!(1.0)));

        let integers = Strategy::build(&all_of(vec![ParameterSchema::integer(), multiple(1.5)]))
            .unwrap();
        assert!(integers.accepts(&json!(3)));
        assert!(!integers.accepts(&json!(2)));
        assert!(!integers.accepts(&json!(12)));
    }

    #[test]
    fn conflicting_types_name_both() {
        let err = Strategy::build(&all_of(vec![
            ParameterSchema::integer(),
            ParameterSchema::string(),
        ]))
        .unwrap_err();
        assert_eq!(err.reason, "allOf requires both integer and string");
    }
}
