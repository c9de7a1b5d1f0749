//! Deduplicated storage and identity for resolvable expressions.
//!
//! The vault is the anchor for two invariants that make the rest of the planner
//! tractable: *temporal binding* (a command string that captured an `ExprId` at
//! IR-build time keeps referring to exactly that declaration even if the name is
//! later shadowed) and *authorization completeness* (every value that ends up
//! embedded in a command string has a corresponding entry in the plan's
//! `SecretUses` list, and nothing else does).
//!
//! Mirrors the shape of the teacher's `intern` module (opaque integer identities
//! handed out from a growable table) combined with its `resource`-style
//! limit-checked construction, but the vault additionally tracks liveness
//! (`touched`/`declared_live`) and reference sites, which the teacher's string
//! interner has no need for.

use std::fmt;

use ahash::AHashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::value::Value;

type HmacSha256 = Hmac<Sha256>;

/// Opaque, plan-local identity for a resolvable expression.
///
/// Displays as `expr:<n>` to keep callers from depending on it being a small
/// dense integer; internally it is one, for cheap storage and comparison,
/// mirroring the teacher's `StringId`/`NamespaceId` newtype pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(u32);

impl ExprId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("vault exceeded u32::MAX expressions"))
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expr:{}", self.0)
    }
}

/// Stable placeholder emitted into command strings in place of a resolved value.
///
/// Format is always `opal:<opaque>`, where `<opaque>` is derived deterministically
/// from the plan salt and the `ExprId` via HMAC-SHA256, so the same `(salt, id)`
/// pair always yields the same placeholder across runs (determinism invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayId(String);

impl DisplayId {
    fn derive(salt: &[u8; 32], id: ExprId) -> Self {
        let mut mac = HmacSha256::new_from_slice(salt).expect("hmac accepts any key length");
        mac.update(b"opal-display-id:");
        mac.update(&id.0.to_le_bytes());
        let digest = mac.finalize().into_bytes();
        Self(format!("opal:{}", hex::encode(&digest[..16])))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keyed hash of a reference site path, opaque to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteId(String);

impl SiteId {
    fn derive(salt: &[u8; 32], site_path: &str) -> Self {
        let mut mac = HmacSha256::new_from_slice(salt).expect("hmac accepts any key length");
        mac.update(b"opal-site-id:");
        mac.update(site_path.as_bytes());
        let digest = mac.finalize().into_bytes();
        Self(hex::encode(&digest[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single recorded use of an expression, as it will appear in `Plan.SecretUses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretUse {
    pub display_id: DisplayId,
    pub site_id: SiteId,
    pub site: String,
}

/// The decorator "kind" an expression was declared under, used to batch
/// `ResolveAllTouched` calls by decorator so a single registry lookup can
/// service many expressions at once (see §5 of the specification).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExprKind {
    /// A plain `var NAME = ...` declaration, or a loop-injected binding.
    Variable,
    /// A `@path.to.thing` decorator reference resolved through the registry.
    Decorator(String),
    /// A literal with no resolution step (already a concrete value).
    Literal,
}

#[derive(Debug, Clone)]
struct ExprRecord {
    raw: String,
    kind: ExprKind,
    value: Option<Value>,
    touched: bool,
    /// Set once the declaring statement has actually been walked by the resolver
    /// in a live (non-pruned) position. An expression can be `touched` (read)
    /// without ever becoming `declared_live` if its declaration lived only in a
    /// branch that was pruned before the resolver reached it -- that is exactly
    /// the "undefined variable in a live path" condition.
    declared_live: bool,
    /// Set when a dangling touch of this expression was dropped under
    /// `UndefinedVariablePolicy::DropStep`, so the emitter can recognize the
    /// resulting missing display id as an intentional omission rather than a
    /// planner bug and skip the referencing statement instead of erroring.
    dropped: bool,
    display_id: Option<DisplayId>,
    sites: Vec<(SiteId, String)>,
    /// The variable name this entry was declared under, for
    /// `ResolverError::UndefinedVariable` messages. `None` for expressions with
    /// no associated `var` declaration (decorator references, literals).
    name: Option<String>,
}

/// Deduplicated expression store plus lexical scope stack.
///
/// Scope management lives here (rather than in a separate type) because scope
/// lookups and expression declaration are intrinsically coupled: declaring a
/// variable always means binding a name in the current frame to a vault entry.
pub struct Vault {
    key: [u8; 32],
    exprs: Vec<ExprRecord>,
    /// Dedup index: raw expression text -> existing `ExprId`, for `DeclareVariable`'s
    /// "same raw text maps to the same id" rule (see `declare_variable`).
    dedup: AHashMap<String, ExprId>,
    scopes: Vec<AHashMap<String, ExprId>>,
    step_counter: usize,
}

impl Vault {
    /// Creates a vault with an explicit 32-byte key (the "plan salt").
    #[must_use]
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key, exprs: Vec::new(), dedup: AHashMap::new(), scopes: vec![AHashMap::new()], step_counter: 0 }
    }

    /// Creates a vault with a randomly generated key, for callers that do not
    /// need reproducible display IDs across runs (e.g. ad-hoc tooling).
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore as _;
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::with_key(key)
    }

    /// Returns the 32-byte key that becomes the plan's salt.
    #[must_use]
    pub fn plan_key(&self) -> [u8; 32] {
        self.key
    }

    // -- scope management ----------------------------------------------------

    /// Pushes a new scope frame, used when entering a decorator-isolated block.
    pub fn push_scope(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    /// Pops the innermost scope frame. Bindings made inside it stop being visible;
    /// their `ExprId`s remain valid in the vault (already-captured temporal
    /// references elsewhere are unaffected).
    ///
    /// # Panics
    /// Panics if called with no frame beyond the root -- a builder bug (every
    /// push must be paired with exactly one pop).
    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "pop_scope called with no non-root frame to pop");
        self.scopes.pop();
    }

    /// Looks up a variable name, walking outer frames. `None` means the name has
    /// no reachable declaration at this point in the lexical scan.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ExprId> {
        self.scopes.iter().rev().find_map(|frame| frame.get(name).copied())
    }

    /// Resets the per-step decorator/site indexing counter. Called by the
    /// builder at each `StepEnter`.
    pub fn reset_step_counter(&mut self) {
        self.step_counter += 1;
    }

    // -- declaration -----------------------------------------------------------

    /// Declares a variable, binding `name` in the current (innermost) scope frame.
    ///
    /// Dedup policy: if the *current frame* already has a binding for `name`, this
    /// is a redeclaration (e.g. `var COUNT = "5"` followed later by
    /// `var COUNT = "10"`) and always produces a **fresh** `ExprId`, rebinding the
    /// name -- this is what makes shadowing observable (temporal binding keeps
    /// earlier captures pointed at the old id). If no binding for `name` exists in
    /// the current frame, but another declaration anywhere in the vault has
    /// byte-identical raw text for the same name, that earlier id is reused, so
    /// that structurally identical declarations (e.g. loop-injected bindings with
    /// the same literal element appearing twice) still get stable placeholders.
    pub fn declare_variable(&mut self, name: &str, raw: &str) -> ExprId {
        let already_bound_this_frame =
            self.scopes.last().is_some_and(|frame| frame.contains_key(name));

        let id = if already_bound_this_frame {
            self.alloc(raw, ExprKind::Variable, Some(name))
        } else if let Some(&existing) = self.dedup.get(raw) {
            existing
        } else {
            let id = self.alloc(raw, ExprKind::Variable, Some(name));
            self.dedup.insert(raw.to_owned(), id);
            id
        };

        self.scopes.last_mut().expect("root scope always present").insert(name.to_owned(), id);
        id
    }

    /// Tracks an expression with no associated variable name (decorator
    /// references, binary operation operands materialized as intermediate
    /// literals, etc). Always allocates fresh -- only named `var` declarations
    /// get cross-expression dedup.
    pub fn track_expression(&mut self, raw: &str, kind: ExprKind) -> ExprId {
        self.alloc(raw, kind, None)
    }

    fn alloc(&mut self, raw: &str, kind: ExprKind, name: Option<&str>) -> ExprId {
        let id = ExprId::new(self.exprs.len());
        self.exprs.push(ExprRecord {
            raw: raw.to_owned(),
            kind,
            value: None,
            touched: false,
            declared_live: false,
            dropped: false,
            display_id: None,
            sites: Vec::new(),
            name: name.map(ToOwned::to_owned),
        });
        id
    }

    /// Directly stores a resolved value, bypassing the decorator registry. Used
    /// for literals and for loop-injected per-iteration bindings, whose values
    /// are already known at splice time.
    pub fn store_unresolved_value(&mut self, id: ExprId, value: Value) {
        self.exprs[id.index()].value = Some(value);
    }

    // -- liveness ---------------------------------------------------------------

    /// Marks `id` as touched. Returns `true` the first time this transitions an
    /// expression from untouched to touched, so callers driving a fixed-point
    /// loop (the resolver's wave loop) can detect forward progress.
    pub fn mark_touched(&mut self, id: ExprId) -> bool {
        let record = &mut self.exprs[id.index()];
        let was_untouched = !record.touched;
        record.touched = true;
        was_untouched
    }

    #[must_use]
    pub fn is_touched(&self, id: ExprId) -> bool {
        self.exprs[id.index()].touched
    }

    /// Marks that `id`'s declaring statement was walked by the resolver while
    /// live (not inside a pruned or not-yet-resolved branch).
    pub fn mark_declared_live(&mut self, id: ExprId) {
        self.exprs[id.index()].declared_live = true;
    }

    #[must_use]
    pub fn is_declared_live(&self, id: ExprId) -> bool {
        self.exprs[id.index()].declared_live
    }

    #[must_use]
    pub fn raw(&self, id: ExprId) -> &str {
        &self.exprs[id.index()].raw
    }

    /// The variable name `id` was declared under, if any.
    #[must_use]
    pub fn name(&self, id: ExprId) -> Option<&str> {
        self.exprs[id.index()].name.as_deref()
    }

    /// Every expression that is touched but never became declared-live: a
    /// read of a declaration that was never reached along a live path. Empty
    /// at a correctly resolved fixed point.
    #[must_use]
    pub fn dangling_touches(&self) -> Vec<ExprId> {
        self.exprs
            .iter()
            .enumerate()
            .filter(|(_, record)| record.touched && !record.declared_live)
            .map(|(idx, _)| ExprId::new(idx))
            .collect()
    }

    #[must_use]
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.exprs[id.index()].kind
    }

    #[must_use]
    pub fn value(&self, id: ExprId) -> Option<&Value> {
        self.exprs[id.index()].value.as_ref()
    }

    /// Clears the touched flag. Used when a dangling read (touched but never
    /// `declared_live`) is dropped under `UndefinedVariablePolicy::DropStep`, so
    /// the expression is excluded from the authorization list exactly as if it
    /// had never been referenced.
    pub fn clear_touched(&mut self, id: ExprId) {
        self.exprs[id.index()].touched = false;
        self.exprs[id.index()].dropped = true;
        self.exprs[id.index()].sites.clear();
    }

    /// Whether `id` was a dangling touch cleared under `DropStep`.
    #[must_use]
    pub fn is_dropped(&self, id: ExprId) -> bool {
        self.exprs[id.index()].dropped
    }

    /// Returns every currently touched expression id, grouped by decorator kind,
    /// for batch resolution. Literal/variable kinds that already carry a stored
    /// value are skipped (nothing to resolve).
    #[must_use]
    pub fn touched_unresolved_by_kind(&self) -> Vec<(ExprKind, Vec<ExprId>)> {
        let mut groups: Vec<(ExprKind, Vec<ExprId>)> = Vec::new();
        for (idx, record) in self.exprs.iter().enumerate() {
            if !record.touched || !record.declared_live || record.value.is_some() {
                continue;
            }
            let id = ExprId::new(idx);
            match groups.iter_mut().find(|(k, _)| *k == record.kind) {
                Some((_, ids)) => ids.push(id),
                None => groups.push((record.kind.clone(), vec![id])),
            }
        }
        groups
    }

    /// Assigns display IDs to every touched, declared-live, valued expression
    /// that doesn't have one yet. Called after a decorator batch resolves (or
    /// immediately, for literals/plain variables with an already-stored value).
    pub fn assign_pending_display_ids(&mut self) {
        let key = self.key;
        for (idx, record) in self.exprs.iter_mut().enumerate() {
            if record.touched && record.declared_live && record.value.is_some() && record.display_id.is_none() {
                record.display_id = Some(DisplayId::derive(&key, ExprId::new(idx)));
            }
        }
    }

    #[must_use]
    pub fn display_id(&self, id: ExprId) -> Option<&DisplayId> {
        self.exprs[id.index()].display_id.as_ref()
    }

    /// Records a usage site for an expression, deriving its `SiteId` from the
    /// plan salt. Idempotent: re-recording the same `site_path` for the same
    /// expression (as happens when the resolver re-walks a settled subtree on
    /// a later wave) is a no-op. Returns `true` if this site was newly added.
    pub fn record_reference(&mut self, id: ExprId, site_path: &str) -> bool {
        let sites = &mut self.exprs[id.index()].sites;
        if sites.iter().any(|(_, existing)| existing == site_path) {
            return false;
        }
        let site_id = SiteId::derive(&self.key, site_path);
        sites.push((site_id, site_path.to_owned()));
        true
    }

    /// Builds the authorization list: one `SecretUse` per recorded reference site
    /// of every touched, resolved expression. Order follows expression
    /// declaration order, then site recording order, for determinism.
    #[must_use]
    pub fn build_secret_uses(&self) -> Vec<SecretUse> {
        let mut uses = Vec::new();
        for record in &self.exprs {
            if !record.touched || !record.declared_live {
                continue;
            }
            let Some(display_id) = &record.display_id else { continue };
            for (site_id, site) in &record.sites {
                uses.push(SecretUse { display_id: display_id.clone(), site_id: site_id.clone(), site: site.clone() });
            }
        }
        uses
    }

    /// Removes no-longer-needed bookkeeping for expressions that were never
    /// touched. The vault never reuses `ExprId`s (indices are stable for the
    /// lifetime of the vault), so this only clears any stray stored value to
    /// free memory -- it does not renumber anything.
    pub fn prune_untouched(&mut self) {
        for record in &mut self.exprs {
            if !record.touched {
                record.value = None;
                record.display_id = None;
            }
        }
    }
}
