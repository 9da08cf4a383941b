//! Id-stable constraint storage.

use georeg_core::{Constraint, ConstraintError, ConstraintId, ConstraintKind, SourceBounds};
use georeg_geodesy::{CoordinateMode, GeodesyAdapter};
use nalgebra::Point2;

use crate::error::SessionError;

/// Constraints in ascending id order plus the next free id.
///
/// Ids are never handed out twice, even after deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintStore {
    next_id: ConstraintId,
    constraints: Vec<Constraint>,
}

impl Default for ConstraintStore {
    fn default() -> Self {
        Self {
            next_id: 1,
            constraints: Vec::new(),
        }
    }
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted parts. `next_id` is raised past the
    /// largest stored id if needed.
    pub fn from_parts(
        next_id: ConstraintId,
        mut constraints: Vec<Constraint>,
    ) -> Result<Self, SessionError> {
        constraints.sort_by_key(|c| c.id);
        let floor = match constraints.last() {
            Some(c) => c.id.checked_add(1).ok_or(SessionError::IdExhausted(c.id))?,
            None => 1,
        };
        if next_id < floor {
            log::warn!("store: next_id {next_id} is not past stored ids, using {floor}");
        }
        Ok(Self {
            next_id: next_id.max(floor),
            constraints,
        })
    }

    pub fn next_id(&self) -> ConstraintId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn list(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn get(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.constraints[i])
    }

    /// Validate, assign the next id and append.
    ///
    /// Point pairs get `dst_real` / `dst_local` derived when an adapter is
    /// given; a failed derivation leaves them unset.
    pub fn add(
        &mut self,
        kind: ConstraintKind,
        bounds: Option<&SourceBounds>,
        adapter: Option<&GeodesyAdapter<'_>>,
    ) -> Result<&[Constraint], SessionError> {
        self.insert(self.next_id, kind, bounds, adapter)
    }

    /// Like [`ConstraintStore::add`] with a caller-chosen id, which must not
    /// be below [`ConstraintStore::next_id`].
    pub fn add_with_id(
        &mut self,
        id: ConstraintId,
        kind: ConstraintKind,
        bounds: Option<&SourceBounds>,
        adapter: Option<&GeodesyAdapter<'_>>,
    ) -> Result<&[Constraint], SessionError> {
        if id < self.next_id {
            return Err(SessionError::IdReused {
                id,
                next_id: self.next_id,
            });
        }
        self.insert(id, kind, bounds, adapter)
    }

    fn insert(
        &mut self,
        id: ConstraintId,
        mut kind: ConstraintKind,
        bounds: Option<&SourceBounds>,
        adapter: Option<&GeodesyAdapter<'_>>,
    ) -> Result<&[Constraint], SessionError> {
        let next_id = id.checked_add(1).ok_or(SessionError::IdExhausted(id))?;
        kind.validate(bounds)?;
        self.check_relation(&kind)?;
        derive_fields(&mut kind, adapter);
        log::debug!("store: added {} #{id}", kind.label());
        self.constraints.push(Constraint { id, kind });
        self.next_id = next_id;
        Ok(&self.constraints)
    }

    fn check_relation(&self, kind: &ConstraintKind) -> Result<(), ConstraintError> {
        let ConstraintKind::Relational { a_id, b_id, .. } = kind else {
            return Ok(());
        };
        for target in [*a_id, *b_id] {
            let reason = match self.get(target) {
                None => format!("referenced constraint {target} does not exist"),
                Some(c) if !c.kind.is_geometric() => format!(
                    "referenced constraint {target} is a {}, not a geometric constraint",
                    c.kind.label()
                ),
                Some(_) => continue,
            };
            return Err(ConstraintError::InvalidConstraint {
                kind: kind.label(),
                reason,
            });
        }
        Ok(())
    }

    /// Remove `id` and every relation that references it.
    pub fn delete(&mut self, id: ConstraintId) -> Result<&[Constraint], SessionError> {
        if self.get(id).is_none() {
            return Err(SessionError::UnknownConstraint(id));
        }
        self.constraints.retain(|c| {
            let cascade = matches!(
                c.kind,
                ConstraintKind::Relational { a_id, b_id, .. } if a_id == id || b_id == id
            );
            if cascade {
                log::info!("store: relation #{} removed with #{id}", c.id);
            }
            c.id != id && !cascade
        });
        log::debug!("store: deleted #{id}");
        Ok(&self.constraints)
    }

    /// Recompute derived point-pair fields, e.g. after the georeference
    /// changed.
    pub fn rederive(&mut self, adapter: Option<&GeodesyAdapter<'_>>) {
        for c in &mut self.constraints {
            derive_fields(&mut c.kind, adapter);
        }
    }
}

fn derive_fields(kind: &mut ConstraintKind, adapter: Option<&GeodesyAdapter<'_>>) {
    let ConstraintKind::PointPair {
        dst,
        dst_real,
        dst_local,
        ..
    } = kind
    else {
        return;
    };
    match adapter {
        Some(adapter) => {
            *dst_real = Some(adapter.pixel_to_world(dst.x, dst.y));
            *dst_local = match adapter.pixel_to(dst.x, dst.y, CoordinateMode::LocalMeters) {
                Ok(c) => Some(Point2::new(c.x, c.y)),
                Err(err) => {
                    log::debug!("store: local metres unavailable: {err}");
                    None
                }
            };
        }
        None => {
            *dst_real = None;
            *dst_local = None;
        }
    }
}
