//! Uniqueness and mandatory-property constraints.
//!
//! A constraint is created in `Pending`, validated against every existing
//! entity of its schema, and then either promoted to `Active` or parked as
//! `Failed`. While Active, every write that touches the schema enforces the
//! constraint atomically with the write: the store checks the prospective
//! entity state *before* mutating, so a violation aborts with
//! `ConstraintViolation` and leaves the graph untouched.
//!
//! Unique constraints are backed by an exact-match index over the same
//! attribute tuple (the store creates one when missing); mandatory
//! constraints check attribute presence directly.

use crate::index::ExactIndex;
use crate::model::Value;
use crate::store::entity::AttributeSet;
use crate::store::schema::AttrId;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    /// No two entities of the schema may share this attribute tuple.
    Unique(Vec<AttrId>),
    /// Every entity of the schema must carry these attributes.
    Mandatory(Vec<AttrId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintStatus {
    Pending,
    Active,
    Failed,
}

#[derive(Debug)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub status: ConstraintStatus,
    /// Writes currently holding a reference to this constraint. Kept so a
    /// DROP cannot tear the constraint out from under an in-flight scan.
    pub pending_ops: u32,
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self { kind, status: ConstraintStatus::Pending, pending_ops: 0 }
    }

    pub fn attrs(&self) -> &[AttrId] {
        match &self.kind {
            ConstraintKind::Unique(attrs) | ConstraintKind::Mandatory(attrs) => attrs,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConstraintStatus::Active
    }

    /// Check a prospective entity state against this constraint.
    ///
    /// For Unique the caller passes the backing index and the entity's own
    /// id (so re-setting an attribute to its current value is not a
    /// self-collision).
    pub fn check(
        &self,
        entity_id: u64,
        attrs: &AttributeSet,
        backing: Option<&ExactIndex>,
        describe: &dyn Fn(AttrId) -> String,
    ) -> Result<()> {
        match &self.kind {
            ConstraintKind::Mandatory(required) => {
                for attr in required {
                    if !attrs.contains(*attr) {
                        return Err(Error::ConstraintViolation(format!(
                            "missing mandatory property '{}'",
                            describe(*attr)
                        )));
                    }
                }
                Ok(())
            }
            ConstraintKind::Unique(fields) => {
                let mut tuple: Vec<Value> = Vec::with_capacity(fields.len());
                for field in fields {
                    match attrs.get(*field) {
                        Some(v) => tuple.push(v.clone()),
                        // entities missing part of the tuple are exempt
                        None => return Ok(()),
                    }
                }
                let Some(index) = backing else {
                    return Err(Error::InternalInvariant(
                        "unique constraint without a backing index".into(),
                    ));
                };
                if index.occupied_by_other(&tuple, Some(entity_id)) {
                    let fields_desc: Vec<String> =
                        fields.iter().map(|f| describe(*f)).collect();
                    return Err(Error::ConstraintViolation(format!(
                        "unique constraint violated on ({})",
                        fields_desc.join(", ")
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attrs(pairs: &[(u16, Value)]) -> AttributeSet {
        pairs.iter().map(|(a, v)| (AttrId(*a), v.clone())).collect()
    }

    fn name_of(_: AttrId) -> String {
        "email".into()
    }

    #[test]
    fn test_mandatory_check() {
        let c = Constraint::new(ConstraintKind::Mandatory(vec![AttrId(0)]));
        assert!(c.check(1, &attrs(&[(0, Value::from("x"))]), None, &name_of).is_ok());
        let err = c.check(1, &attrs(&[(1, Value::from("x"))]), None, &name_of).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_unique_check_excludes_self() {
        let mut idx = ExactIndex::new(vec![AttrId(0)]);
        idx.index_entity(1, &attrs(&[(0, Value::from("a@b"))]));
        let c = Constraint::new(ConstraintKind::Unique(vec![AttrId(0)]));

        // same value, same entity: fine
        assert!(c.check(1, &attrs(&[(0, Value::from("a@b"))]), Some(&idx), &name_of).is_ok());
        // same value, different entity: violation
        let err = c.check(2, &attrs(&[(0, Value::from("a@b"))]), Some(&idx), &name_of).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_unique_exempts_partial_tuple() {
        let idx = ExactIndex::new(vec![AttrId(0)]);
        let c = Constraint::new(ConstraintKind::Unique(vec![AttrId(0)]));
        assert!(c.check(5, &attrs(&[(3, Value::Int(1))]), Some(&idx), &name_of).is_ok());
    }

    #[test]
    fn test_status_starts_pending() {
        let c = Constraint::new(ConstraintKind::Unique(vec![AttrId(0)]));
        assert_eq!(c.status, ConstraintStatus::Pending);
        assert!(!c.is_active());
    }
}
