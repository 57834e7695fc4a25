//! State Graph
//!
//! Built from the `states` section of the configuration. Each state carries
//! its mutation rules and an ordered list of guarded transitions. Loading
//! validates every reference against the attribute registry and reports
//! all problems at once.

use std::collections::{BTreeSet, HashMap};

use crate::attributes::AttributeTypeRegistry;
use crate::config::dto::StateDto;
use crate::error::{StmError, StmResult};
use crate::expr::{evaluate_guard, parse_action, parse_guard, Action, Guard, Statement};
use crate::types::Attributes;

/// These roles may set any of these attributes while the entity is in the
/// owning state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRule {
    pub attributes: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub guard: Guard,
    /// Guard text as written, for logs.
    pub guard_source: String,
    pub next_state: String,
    pub action: Option<Action>,
}

#[derive(Debug, Clone)]
pub struct StateDefinition {
    pub name: String,
    /// Declared order is the match order.
    pub transitions: Vec<Transition>,
    pub mutables: Vec<MutationRule>,
}

#[derive(Debug, Clone, Default)]
pub struct StateGraph {
    states: HashMap<String, StateDefinition>,
    order: Vec<String>,
}

impl StateGraph {
    /// Build the graph from configuration, validated against `registry`.
    pub fn load(decls: &[(String, StateDto)], registry: &AttributeTypeRegistry) -> StmResult<Self> {
        let mut errors = Vec::new();

        let mut declared: BTreeSet<&str> = BTreeSet::new();
        for (name, _) in decls {
            if name.trim().is_empty() {
                errors.push("state with empty name".to_string());
            } else if !declared.insert(name.as_str()) {
                errors.push(format!("duplicate state '{}'", name));
            }
        }

        let mut graph = Self::default();
        for (name, dto) in decls {
            if graph.states.contains_key(name) {
                continue;
            }
            let def = load_state(name, dto, &declared, registry, &mut errors);
            graph.order.push(name.clone());
            graph.states.insert(name.clone(), def);
        }

        if errors.is_empty() {
            Ok(graph)
        } else {
            Err(StmError::Config(errors.join("; ")))
        }
    }

    /// Definition of `state`. A miss means the entity is corrupt or the
    /// configuration changed under it.
    pub fn definition_of(&self, state: &str) -> StmResult<&StateDefinition> {
        self.states
            .get(state)
            .ok_or_else(|| StmError::UnknownState(state.to_string()))
    }

    pub fn contains(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }

    /// Union of roles across every rule of `state` that mentions `attribute`.
    pub fn allowed_roles_for(&self, state: &str, attribute: &str) -> StmResult<BTreeSet<String>> {
        let def = self.definition_of(state)?;
        Ok(def
            .mutables
            .iter()
            .filter(|rule| rule.attributes.contains(attribute))
            .flat_map(|rule| rule.roles.iter().cloned())
            .collect())
    }

    /// First transition of `state`, in declared order, whose guard holds.
    pub fn first_matching_transition(
        &self,
        state: &str,
        attrs: &Attributes,
    ) -> StmResult<Option<&Transition>> {
        let def = self.definition_of(state)?;
        Ok(def
            .transitions
            .iter()
            .find(|t| evaluate_guard(&t.guard, attrs)))
    }

    /// State names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn load_state(
    name: &str,
    dto: &StateDto,
    declared: &BTreeSet<&str>,
    registry: &AttributeTypeRegistry,
    errors: &mut Vec<String>,
) -> StateDefinition {
    let mut mutables = Vec::with_capacity(dto.mutables.len());
    for (idx, rule) in dto.mutables.iter().enumerate() {
        for attr in &rule.attributes {
            if !registry.contains(attr) {
                errors.push(format!(
                    "state '{}' mutables[{}]: unknown attribute '{}'",
                    name, idx, attr
                ));
            }
        }
        mutables.push(MutationRule {
            attributes: rule.attributes.iter().cloned().collect(),
            roles: rule.by_roles.iter().cloned().collect(),
        });
    }

    let mut transitions = Vec::with_capacity(dto.state_transitions.len());
    for (idx, t) in dto.state_transitions.iter().enumerate() {
        let at = format!("state '{}' state_transitions[{}]", name, idx);

        if !declared.contains(t.next_state.as_str()) {
            errors.push(format!("{}: unknown next_state '{}'", at, t.next_state));
        }

        let guard = match parse_guard(&t.when) {
            Ok(g) => {
                check_guard(&at, &g, registry, errors);
                Some(g)
            }
            Err(e) => {
                errors.push(format!("{}: invalid guard: {}", at, e));
                None
            }
        };

        let action = match t.action.as_deref().map(parse_action).transpose() {
            Ok(a) => {
                if let Some(a) = &a {
                    check_action(&at, a, registry, errors);
                }
                Some(a)
            }
            Err(e) => {
                errors.push(format!("{}: invalid action: {}", at, e));
                None
            }
        };

        if let (Some(guard), Some(action)) = (guard, action) {
            transitions.push(Transition {
                guard,
                guard_source: t.when.clone(),
                next_state: t.next_state.clone(),
                action,
            });
        }
    }

    StateDefinition {
        name: name.to_string(),
        transitions,
        mutables,
    }
}

fn check_guard(at: &str, guard: &Guard, registry: &AttributeTypeRegistry, errors: &mut Vec<String>) {
    for attr in guard.attributes() {
        if !registry.contains(attr) {
            errors.push(format!("{}: guard references unknown attribute '{}'", at, attr));
        }
    }
    for (attr, op, literal) in guard.attribute_comparisons() {
        if !op.is_ordering() {
            continue;
        }
        if let Ok(ty) = registry.type_of(attr) {
            if !ty.orderable_with(literal) {
                errors.push(format!(
                    "{}: '{} {} {}' cannot order a {} attribute",
                    at,
                    attr,
                    op.symbol(),
                    literal,
                    ty
                ));
            }
        }
    }
}

fn check_action(at: &str, action: &Action, registry: &AttributeTypeRegistry, errors: &mut Vec<String>) {
    for attr in action.attributes() {
        if !registry.contains(attr) {
            errors.push(format!("{}: action references unknown attribute '{}'", at, attr));
        }
    }
    for stmt in &action.statements {
        let Statement::Set { target, value } = stmt else {
            continue;
        };
        let (Some(literal), Ok(ty)) = (value.as_literal(), registry.type_of(target)) else {
            continue;
        };
        if literal.is_null() {
            continue;
        }
        if let Err(reason) = ty.check(literal) {
            errors.push(format!("{}: action assigns '{}': {}", at, target, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dto::{AttributeDeclDto, MutableDto, TransitionDto};
    use serde_json::json;

    fn registry(names: &[(&str, &str)]) -> AttributeTypeRegistry {
        let decls: Vec<_> = names
            .iter()
            .map(|(n, t)| (n.to_string(), AttributeDeclDto::Shorthand(t.to_string())))
            .collect();
        AttributeTypeRegistry::load(&decls).unwrap()
    }

    fn transition(when: &str, next: &str, action: Option<&str>) -> TransitionDto {
        TransitionDto {
            next_state: next.to_string(),
            when: when.to_string(),
            action: action.map(str::to_string),
        }
    }

    fn rule(attrs: &[&str], roles: &[&str]) -> MutableDto {
        MutableDto {
            attributes: attrs.iter().map(|s| s.to_string()).collect(),
            by_roles: roles.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn state(transitions: Vec<TransitionDto>, mutables: Vec<MutableDto>) -> StateDto {
        StateDto {
            state_transitions: transitions,
            mutables,
        }
    }

    #[test]
    fn test_allowed_roles_is_union_of_rules() {
        let reg = registry(&[("name", "string"), ("price", "number")]);
        let graph = StateGraph::load(
            &[(
                "creation".into(),
                state(
                    vec![],
                    vec![
                        rule(&["name"], &["creator"]),
                        rule(&["name", "price"], &["editor"]),
                    ],
                ),
            )],
            &reg,
        )
        .unwrap();

        let name_roles = graph.allowed_roles_for("creation", "name").unwrap();
        assert_eq!(
            name_roles.into_iter().collect::<Vec<_>>(),
            vec!["creator".to_string(), "editor".to_string()]
        );
        let price_roles = graph.allowed_roles_for("creation", "price").unwrap();
        assert_eq!(price_roles.len(), 1);
        assert!(price_roles.contains("editor"));
    }

    #[test]
    fn test_unmentioned_attribute_has_no_roles() {
        let reg = registry(&[("name", "string"), ("price", "number")]);
        let graph = StateGraph::load(
            &[("creation".into(), state(vec![], vec![rule(&["name"], &["creator"])]))],
            &reg,
        )
        .unwrap();
        assert!(graph.allowed_roles_for("creation", "price").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_state_lookup_is_internal() {
        let graph = StateGraph::load(&[], &registry(&[])).unwrap();
        let err = graph.allowed_roles_for("ghost", "name").unwrap_err();
        assert!(matches!(err, StmError::UnknownState(ref s) if s == "ghost"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn test_first_match_follows_declared_order() {
        let reg = registry(&[("name", "string")]);
        let load = |first: &str, second: &str| {
            StateGraph::load(
                &[
                    (
                        "start".into(),
                        state(
                            vec![transition("true", first, None), transition("true", second, None)],
                            vec![],
                        ),
                    ),
                    ("left".into(), state(vec![], vec![])),
                    ("right".into(), state(vec![], vec![])),
                ],
                &reg,
            )
            .unwrap()
        };

        let attrs = Attributes::new();
        let graph = load("left", "right");
        let t = graph.first_matching_transition("start", &attrs).unwrap().unwrap();
        assert_eq!(t.next_state, "left");

        let graph = load("right", "left");
        let t = graph.first_matching_transition("start", &attrs).unwrap().unwrap();
        assert_eq!(t.next_state, "right");
    }

    #[test]
    fn test_no_match_returns_none() {
        let reg = registry(&[("name", "string")]);
        let graph = StateGraph::load(
            &[
                (
                    "creation".into(),
                    state(vec![transition("name is present", "done", None)], vec![]),
                ),
                ("done".into(), state(vec![], vec![])),
            ],
            &reg,
        )
        .unwrap();

        let mut attrs = Attributes::new();
        assert!(graph.first_matching_transition("creation", &attrs).unwrap().is_none());
        attrs.insert("name".into(), json!("Sunrise"));
        assert!(graph.first_matching_transition("creation", &attrs).unwrap().is_some());
    }

    #[test]
    fn test_load_reports_every_problem() {
        let reg = registry(&[("name", "string"), ("flag", "boolean"), ("price", "number")]);
        let err = StateGraph::load(
            &[
                (
                    "creation".into(),
                    state(
                        vec![
                            transition("colour is present", "nowhere", None),
                            transition("name and (", "creation", None),
                            transition("flag > 1", "creation", Some("price = 'cheap'")),
                        ],
                        vec![rule(&["size"], &["creator"])],
                    ),
                ),
                ("creation".into(), state(vec![], vec![])),
            ],
            &reg,
        )
        .unwrap_err();

        let msg = match err {
            StmError::Config(msg) => msg,
            other => panic!("Expected config error, got {:?}", other),
        };
        assert!(msg.contains("duplicate state 'creation'"));
        assert!(msg.contains("unknown attribute 'size'"));
        assert!(msg.contains("unknown next_state 'nowhere'"));
        assert!(msg.contains("guard references unknown attribute 'colour'"));
        assert!(msg.contains("invalid guard"));
        assert!(msg.contains("cannot order a boolean attribute"));
        assert!(msg.contains("action assigns 'price'"));
    }

    #[test]
    fn test_action_unknown_attribute_rejected() {
        let reg = registry(&[("name", "string")]);
        let err = StateGraph::load(
            &[(
                "a".into(),
                state(vec![transition("true", "a", Some("title = name"))], vec![]),
            )],
            &reg,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("action references unknown attribute 'title'"));
    }
}
