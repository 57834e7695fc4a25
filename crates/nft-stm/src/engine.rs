//! STM Engine
//!
//! Combines the attribute registry and the state graph into the operations
//! callers use: what may this actor set, apply a write, and let the entity
//! settle into its resulting state. An engine is built from one
//! configuration snapshot and never mutated afterwards.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::attributes::{AttributeType, AttributeTypeRegistry};
use crate::config::dto::StmConfigDto;
use crate::config::loader::{parse_config_yaml, StmConfigLoader};
use crate::error::{StmError, StmResult};
use crate::expr::{apply_action, Action, EvalError, Statement};
use crate::graph::StateGraph;
use crate::types::{Actor, Attributes, Nft, NftUpdate};

/// Entity fields that can be sorted on besides declared attributes.
pub const TOP_LEVEL_FIELDS: [&str; 4] = ["id", "state", "created_at", "updated_at"];

#[derive(Debug, Clone)]
pub struct StmEngine {
    attributes: AttributeTypeRegistry,
    graph: StateGraph,
    initial_state: String,
    deletable_in_states: BTreeSet<String>,
}

impl StmEngine {
    /// Validate a configuration document and build an engine from it.
    pub fn from_config(dto: &StmConfigDto) -> StmResult<Self> {
        let attributes = AttributeTypeRegistry::load(&dto.attributes)?;
        let graph = StateGraph::load(&dto.states, &attributes)?;

        let mut errors = Vec::new();
        if !graph.contains(&dto.initial_state) {
            errors.push(format!("initial_state '{}' is not a declared state", dto.initial_state));
        }
        for state in &dto.deletable_in_states {
            if !graph.contains(state) {
                errors.push(format!("deletable_in_states: '{}' is not a declared state", state));
            }
        }
        if !errors.is_empty() {
            return Err(StmError::Config(errors.join("; ")));
        }

        info!(
            attributes = attributes.len(),
            states = graph.len(),
            initial_state = %dto.initial_state,
            "State machine configuration loaded"
        );

        Ok(Self {
            attributes,
            graph,
            initial_state: dto.initial_state.clone(),
            deletable_in_states: dto.deletable_in_states.iter().cloned().collect(),
        })
    }

    pub fn from_yaml_str(yaml: &str) -> StmResult<Self> {
        Self::from_config(&parse_config_yaml(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StmResult<Self> {
        Self::from_config(&StmConfigLoader::new(path.as_ref()).load()?)
    }

    pub fn attributes(&self) -> &AttributeTypeRegistry {
        &self.attributes
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    /// State new entities start in.
    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn is_deletable_in(&self, state: &str) -> bool {
        self.deletable_in_states.contains(state)
    }

    /// Fields accepted for ordering entity listings.
    pub fn sortable_fields(&self) -> Vec<String> {
        TOP_LEVEL_FIELDS
            .iter()
            .copied()
            .chain(self.attributes.names())
            .map(str::to_string)
            .collect()
    }

    /// Every attribute the actor may set in the entity's current state, with
    /// its declared type.
    pub fn get_allowed_actions(
        &self,
        actor: &Actor,
        nft: &Nft,
    ) -> StmResult<BTreeMap<String, AttributeType>> {
        let def = self.graph.definition_of(&nft.state)?;
        let mut allowed = BTreeMap::new();
        for rule in &def.mutables {
            if !rule.roles.iter().any(|r| actor.has_role(r)) {
                continue;
            }
            for attr in &rule.attributes {
                allowed.insert(attr.clone(), self.attributes.type_of(attr)?.clone());
            }
        }
        Ok(allowed)
    }

    /// Authorize, validate and apply one attribute write.
    ///
    /// `raw` is JSON text; `None` (or JSON `null`) clears the attribute. On
    /// error the entity is left untouched.
    pub fn try_attribute_apply(
        &self,
        actor: &Actor,
        nft: &mut Nft,
        attribute: &str,
        raw: Option<&str>,
    ) -> StmResult<()> {
        let ty = match self.attributes.type_of(attribute) {
            Ok(ty) => ty,
            Err(e) => {
                warn!(nft_id = nft.id, attribute, "Write to undeclared attribute");
                return Err(e);
            }
        };

        let roles = self.graph.allowed_roles_for(&nft.state, attribute)?;
        if !roles.iter().any(|r| actor.has_role(r)) {
            debug!(
                nft_id = nft.id,
                attribute,
                state = %nft.state,
                roles = %actor.roles_display(),
                "Attribute write not allowed"
            );
            return Err(StmError::NotAllowed {
                attribute: attribute.to_string(),
                state: nft.state.clone(),
                roles: actor.roles_display(),
            });
        }

        let value = match raw {
            None => None,
            Some(raw) => ty.parse_raw(raw).map_err(|reason| {
                debug!(nft_id = nft.id, attribute, %reason, "Invalid attribute value");
                StmError::invalid(attribute, reason)
            })?,
        };

        match value {
            Some(v) => {
                nft.attributes.insert(attribute.to_string(), v);
            }
            None => {
                nft.attributes.remove(attribute);
            }
        }
        Ok(())
    }

    /// Apply an ordered sequence of writes, then advance.
    ///
    /// Writes see the results of earlier writes in the same sequence. The
    /// caller's entity changes only if every write and the advancement
    /// succeed. Returns whether any transition fired.
    pub fn apply_updates(
        &self,
        actor: &Actor,
        nft: &mut Nft,
        updates: &[NftUpdate],
    ) -> StmResult<bool> {
        let mut working = nft.clone();
        for update in updates {
            if update.file.is_some() {
                return Err(StmError::invalid(
                    &update.attribute,
                    "content must be uploaded before it is applied",
                ));
            }
            self.try_attribute_apply(
                actor,
                &mut working,
                &update.attribute,
                update.value.as_deref(),
            )?;
        }
        if !updates.is_empty() {
            working.updated_at = Utc::now();
        }

        let moved = self.try_move_nft(&mut working)?;
        *nft = working;
        Ok(moved)
    }

    /// Greedy advancement: follow the first matching transition until none
    /// matches. Returns whether at least one transition fired.
    ///
    /// Re-entering any state visited during this run fails with
    /// [`StmError::TransitionCycle`]; the entity is left untouched.
    pub fn try_move_nft(&self, nft: &mut Nft) -> StmResult<bool> {
        let mut state = nft.state.clone();
        let mut attrs = nft.attributes.clone();
        let mut path = vec![state.clone()];

        while let Some(transition) = self.graph.first_matching_transition(&state, &attrs)? {
            let next = transition.next_state.clone();
            if path.contains(&next) {
                path.push(next);
                let err = StmError::TransitionCycle { path };
                error!(nft_id = nft.id, error = %err, "Transition cycle aborted advancement");
                return Err(err);
            }

            if let Some(action) = &transition.action {
                apply_action(action, &mut attrs)
                    .and_then(|()| self.check_action_result(action, &attrs))
                    .map_err(|e| {
                        error!(
                            nft_id = nft.id,
                            from = %state,
                            to = %next,
                            error = %e,
                            "Transition action failed"
                        );
                        StmError::from(e)
                    })?;
            }

            info!(
                nft_id = nft.id,
                from = %state,
                to = %next,
                guard = %transition.guard_source,
                "Transition fired"
            );
            path.push(next.clone());
            state = next;
        }

        if path.len() == 1 {
            return Ok(false);
        }
        nft.state = state;
        nft.attributes = attrs;
        nft.updated_at = Utc::now();
        Ok(true)
    }

    fn check_action_result(&self, action: &Action, attrs: &Attributes) -> Result<(), EvalError> {
        for stmt in &action.statements {
            let Statement::Set { target, .. } = stmt else {
                continue;
            };
            let Some(value) = attrs.get(target) else {
                continue;
            };
            let ty = self
                .attributes
                .type_of(target)
                .map_err(|e| EvalError::InvalidResult {
                    attribute: target.clone(),
                    reason: e.to_string(),
                })?;
            ty.check(value).map_err(|reason| EvalError::InvalidResult {
                attribute: target.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}
