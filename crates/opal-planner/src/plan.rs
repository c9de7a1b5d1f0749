//! The deterministic execution plan emitted from a resolved IR (§3, §4.4).
//!
//! `Plan` is the crate's public output type: a flat, ordered list of `Step`s
//! each wrapping an `ExecutionNode` tree built from the operator-precedence
//! algorithm in the emitter, plus the authorization list collected from the
//! vault. `validate` enforces the plan invariants from §3 and is run by the
//! emitter before returning -- a failure there means the emitter has a bug,
//! not that the input was malformed (see `PlanError::InvalidPlan`).

use serde::{Deserialize, Serialize};

use crate::vault::{DisplayId, SecretUse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectMode {
    Overwrite,
    Append,
}

/// A single command to execute, with arguments fully sorted for determinism
/// (§3 invariant: "CommandNode args sorted").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandNode {
    pub decorator: String,
    pub args: Vec<(String, String)>,
}

impl CommandNode {
    #[must_use]
    pub fn new(decorator: impl Into<String>, mut args: Vec<(String, String)>) -> Self {
        args.sort_by(|a, b| a.0.cmp(&b.0));
        Self { decorator: decorator.into(), args }
    }
}

/// A node in the plan's execution tree. `And`/`Or` stay binary (built
/// left-to-right by the emitter's precedence climbing, the way a chain of
/// mixed `&&`/`||` genuinely nests); a run of same-precedence `|` or `;`
/// emits a single flat `Pipeline`/`Sequence` instead of a nested binary tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionNode {
    Command(CommandNode),
    Pipeline(Vec<ExecutionNode>),
    And(Box<ExecutionNode>, Box<ExecutionNode>),
    Or(Box<ExecutionNode>, Box<ExecutionNode>),
    Sequence(Vec<ExecutionNode>),
    Redirect { mode: RedirectMode, target: String, inner: Box<ExecutionNode> },
    Try { try_node: Box<ExecutionNode>, catch_node: Option<Box<ExecutionNode>>, finally_node: Option<Box<ExecutionNode>> },
    /// A structural marker produced by `if`/`for`/`when`/user-function-call
    /// sites once resolved: carries a human-readable label (the taken branch,
    /// the call target) and the steps that resulted from it.
    Logic { label: String, steps: Vec<Step> },
}

/// One top-level unit of the plan. `id` is strictly positive and strictly
/// increasing across the whole plan (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: u32,
    pub node: ExecutionNode,
}

/// The full output of planning: ordered steps plus the authorization list of
/// every resolved value embedded anywhere in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub secret_uses: Vec<SecretUse>,
    /// The 32-byte salt `DisplayId`s and `SiteId`s in this plan were derived
    /// from. Hex-encoded in the wire form.
    #[serde(with = "hex_salt")]
    pub plan_salt: [u8; 32],
}

mod hex_salt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(salt: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(salt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("plan_salt must decode to 32 bytes"))
    }
}

impl Plan {
    /// Returns every `DisplayId` referenced anywhere a command/redirect target
    /// is built from a resolved expression, for cross-checking against
    /// `secret_uses` in tests and in [`validate`].
    #[must_use]
    pub fn referenced_display_ids(&self) -> Vec<&DisplayId> {
        self.secret_uses.iter().map(|u| &u.display_id).collect()
    }
}

/// Checks the plan invariants from §3: monotonically increasing positive step
/// ids, no node trees with zero commands, sorted `CommandNode` args, and a
/// present 32-byte salt (guaranteed by the type, checked here for clarity at
/// the boundary).
pub fn validate(plan: &Plan) -> Result<(), String> {
    let mut previous_id = 0u32;
    for step in &plan.steps {
        if step.id == 0 {
            return Err("step id must be strictly positive".to_owned());
        }
        if step.id <= previous_id {
            return Err(format!("step ids must strictly increase: {} did not follow {previous_id}", step.id));
        }
        previous_id = step.id;
        validate_node(&step.node)?;
    }
    Ok(())
}

fn validate_node(node: &ExecutionNode) -> Result<(), String> {
    match node {
        ExecutionNode::Command(command) => {
            let sorted = {
                let mut keys: Vec<&str> = command.args.iter().map(|(k, _)| k.as_str()).collect();
                let original = keys.clone();
                keys.sort_unstable();
                keys == original
            };
            if !sorted {
                return Err(format!("command node args not sorted: {:?}", command.args));
            }
            Ok(())
        }
        ExecutionNode::And(a, b) | ExecutionNode::Or(a, b) => {
            validate_node(a)?;
            validate_node(b)
        }
        ExecutionNode::Pipeline(nodes) | ExecutionNode::Sequence(nodes) => {
            if nodes.len() < 2 {
                return Err(format!("chain node must have at least 2 elements, found {}", nodes.len()));
            }
            nodes.iter().try_for_each(validate_node)
        }
        ExecutionNode::Redirect { inner, .. } => validate_node(inner),
        ExecutionNode::Try { try_node, catch_node, finally_node } => {
            validate_node(try_node)?;
            if let Some(n) = catch_node {
                validate_node(n)?;
            }
            if let Some(n) = finally_node {
                validate_node(n)?;
            }
            Ok(())
        }
        ExecutionNode::Logic { steps, .. } => {
            if steps.is_empty() {
                return Ok(());
            }
            validate(&Plan { steps: steps.clone(), secret_uses: Vec::new(), plan_salt: [0; 32] })
        }
    }
}
