//! Local undo/redo.
//!
//! A linear log of [`HistoryAction`]s with a cursor: everything before the
//! cursor has been applied, everything after it can be redone. Recording a
//! new action throws the redo tail away.
//!
//! Undo and redo never talk to the server directly. Each action is lowered
//! into a list of steps, every step is applied to the [`ClientMirror`],
//! and each step that took effect is re-issued through a [`Replicator`] so
//! peers see the reversal too. Steps whose target is gone are skipped.

use std::collections::VecDeque;

use scenesync_core::{GeometryPayload, ObjectId, ObjectPatch, SceneObject};
use scenesync_geometry::{Color, Transform};
use tracing::debug;

use crate::config::ClientConfig;
use crate::mirror::ClientMirror;

/// Outbound side of undo/redo. Calls must not block.
pub trait Replicator {
    fn create(&self, object: &SceneObject);
    fn update(&self, id: ObjectId, patch: ObjectPatch);
    fn delete(&self, id: ObjectId);
}

/// The editable fields of an object at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub kind: String,
    pub transform: Transform,
    pub color: Color,
    pub geometry: GeometryPayload,
    pub properties: serde_json::Value,
}

impl ObjectState {
    pub fn capture(object: &SceneObject) -> Self {
        Self {
            kind: object.kind.clone(),
            transform: object.transform,
            color: object.color,
            geometry: object.geometry.clone(),
            properties: object.properties.clone(),
        }
    }

    /// Patch that moves an object from `from` to this state, touching only
    /// the fields that differ
    pub fn patch_from(&self, from: &ObjectState) -> ObjectPatch {
        let mut patch = ObjectPatch::default();
        if self.kind != from.kind {
            patch.kind = Some(self.kind.clone());
        }
        if self.transform.position != from.transform.position {
            patch.position = Some(self.transform.position);
        }
        if self.transform.rotation != from.transform.rotation {
            patch.rotation = Some(self.transform.rotation);
        }
        if self.transform.scale != from.transform.scale {
            patch.scale = Some(self.transform.scale);
        }
        if self.color != from.color {
            patch.color = Some(self.color);
        }
        if self.geometry != from.geometry {
            patch.geometry = Some(self.geometry.clone());
        }
        if self.properties != from.properties {
            patch.properties = Some(self.properties.clone());
        }
        patch
    }
}

/// Target half of a boolean operation: only its geometry changes
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanTarget {
    pub id: ObjectId,
    pub before_geometry: GeometryPayload,
    pub after_geometry: GeometryPayload,
}

/// One object touched by an automated bulk edit
#[derive(Debug, Clone, PartialEq)]
pub enum BulkEntry {
    Created(SceneObject),
    Updated {
        before: SceneObject,
        after: SceneObject,
    },
    Deleted(SceneObject),
}

impl BulkEntry {
    pub fn id(&self) -> ObjectId {
        match self {
            BulkEntry::Created(object) | BulkEntry::Deleted(object) => object.id,
            BulkEntry::Updated { after, .. } => after.id,
        }
    }

    fn forward(&self) -> Step {
        match self {
            BulkEntry::Created(object) => Step::Create(object.clone()),
            BulkEntry::Updated { before, after } => Step::Update {
                id: after.id,
                patch: ObjectState::capture(after).patch_from(&ObjectState::capture(before)),
            },
            BulkEntry::Deleted(object) => Step::Delete(object.id),
        }
    }

    fn backward(&self) -> Step {
        match self {
            BulkEntry::Created(object) => Step::Delete(object.id),
            BulkEntry::Updated { before, after } => Step::Update {
                id: before.id,
                patch: ObjectState::capture(before).patch_from(&ObjectState::capture(after)),
            },
            BulkEntry::Deleted(object) => Step::Create(object.clone()),
        }
    }
}

/// A reversible, locally authored edit
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryAction {
    Create {
        object: SceneObject,
    },
    Delete {
        objects: Vec<SceneObject>,
    },
    Update {
        id: ObjectId,
        before: ObjectState,
        after: ObjectState,
    },
    /// `target` takes the result geometry, `cutting` is consumed
    Boolean {
        target: BooleanTarget,
        cutting: SceneObject,
    },
    AiBulk {
        command: String,
        entries: Vec<BulkEntry>,
    },
    /// Several actions undone and redone as one
    Group(Vec<HistoryAction>),
}

impl HistoryAction {
    pub fn label(&self) -> &'static str {
        match self {
            HistoryAction::Create { .. } => "create",
            HistoryAction::Delete { .. } => "delete",
            HistoryAction::Update { .. } => "update",
            HistoryAction::Boolean { .. } => "boolean",
            HistoryAction::AiBulk { .. } => "ai-bulk",
            HistoryAction::Group(_) => "group",
        }
    }

    fn redo_steps(&self, out: &mut Vec<Step>) {
        match self {
            HistoryAction::Create { object } => out.push(Step::Create(object.clone())),
            HistoryAction::Delete { objects } => {
                out.extend(objects.iter().map(|o| Step::Delete(o.id)));
            }
            HistoryAction::Update { id, before, after } => out.push(Step::Update {
                id: *id,
                patch: after.patch_from(before),
            }),
            HistoryAction::Boolean { target, cutting } => {
                out.push(Step::Update {
                    id: target.id,
                    patch: ObjectPatch::geometry(target.after_geometry.clone()),
                });
                out.push(Step::Delete(cutting.id));
            }
            HistoryAction::AiBulk { entries, .. } => {
                out.extend(entries.iter().map(BulkEntry::forward));
            }
            HistoryAction::Group(actions) => {
                for action in actions {
                    action.redo_steps(out);
                }
            }
        }
    }

    fn undo_steps(&self, out: &mut Vec<Step>) {
        match self {
            HistoryAction::Create { object } => out.push(Step::Delete(object.id)),
            HistoryAction::Delete { objects } => {
                out.extend(objects.iter().rev().map(|o| Step::Create(o.clone())));
            }
            HistoryAction::Update { id, before, after } => out.push(Step::Update {
                id: *id,
                patch: before.patch_from(after),
            }),
            HistoryAction::Boolean { target, cutting } => {
                out.push(Step::Create(cutting.clone()));
                out.push(Step::Update {
                    id: target.id,
                    patch: ObjectPatch::geometry(target.before_geometry.clone()),
                });
            }
            HistoryAction::AiBulk { entries, .. } => {
                out.extend(entries.iter().rev().map(BulkEntry::backward));
            }
            HistoryAction::Group(actions) => {
                for action in actions.iter().rev() {
                    action.undo_steps(out);
                }
            }
        }
    }
}

/// One mutation produced by undo or redo
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Create(SceneObject),
    Update { id: ObjectId, patch: ObjectPatch },
    Delete(ObjectId),
}

impl Step {
    /// Apply to the mirror and, if it took effect, replicate it
    fn run(self, mirror: &mut ClientMirror, replicator: &dyn Replicator) -> bool {
        match self {
            Step::Create(object) => {
                if mirror.contains(object.id) {
                    debug!(id = %object.id, "object already present, skipping resurrect");
                    return false;
                }
                replicator.create(&object);
                mirror.restore_local(object);
            }
            Step::Update { id, patch } => {
                if patch.is_empty() {
                    return false;
                }
                if mirror.update_local(id, &patch).is_none() {
                    debug!(%id, "history target gone, skipping update");
                    return false;
                }
                replicator.update(id, patch);
            }
            Step::Delete(id) => {
                if mirror.delete_local(id).is_none() {
                    debug!(%id, "history target gone, skipping delete");
                    return false;
                }
                replicator.delete(id);
            }
        }
        true
    }
}

/// Snapshot taken by [`HistoryEngine::begin_update`]
#[derive(Debug, Clone)]
struct Gesture {
    before: Vec<(ObjectId, ObjectState)>,
}

#[derive(Debug)]
pub struct HistoryEngine {
    actions: VecDeque<HistoryAction>,
    /// Number of actions currently applied
    cursor: usize,
    max_depth: usize,
    gesture: Option<Gesture>,
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HistoryEngine {
    pub fn new(max_depth: usize) -> Self {
        Self {
            actions: VecDeque::new(),
            cursor: 0,
            max_depth: max_depth.max(1),
            gesture: None,
        }
    }

    pub fn with_config(config: &ClientConfig) -> Self {
        Self::new(config.history_depth)
    }

    /// Record an applied action, discarding anything that could be redone
    pub fn push(&mut self, action: HistoryAction) {
        self.actions.truncate(self.cursor);
        self.actions.push_back(action);
        while self.actions.len() > self.max_depth {
            self.actions.pop_front();
        }
        self.cursor = self.actions.len();
    }

    pub fn push_create(&mut self, object: &SceneObject) {
        self.push(HistoryAction::Create {
            object: object.clone(),
        });
    }

    pub fn push_delete(&mut self, objects: Vec<SceneObject>) {
        if objects.is_empty() {
            return;
        }
        self.push(HistoryAction::Delete { objects });
    }

    pub fn push_boolean(&mut self, target: BooleanTarget, cutting: SceneObject) {
        self.push(HistoryAction::Boolean { target, cutting });
    }

    pub fn push_ai_bulk(&mut self, command: impl Into<String>, entries: Vec<BulkEntry>) {
        if entries.is_empty() {
            return;
        }
        self.push(HistoryAction::AiBulk {
            command: command.into(),
            entries,
        });
    }

    /// Snapshot the selected objects before a gesture starts.
    ///
    /// Ids not in the mirror are ignored. Starting a new gesture discards an
    /// uncommitted one.
    pub fn begin_update(&mut self, mirror: &ClientMirror, selection: &[ObjectId]) {
        let before = selection
            .iter()
            .filter_map(|id| mirror.get(*id).map(|o| (*id, ObjectState::capture(o))))
            .collect();
        self.gesture = Some(Gesture { before });
    }

    /// Diff the selection against its snapshot and record what changed.
    ///
    /// Returns false (and records nothing) if the gesture changed nothing.
    pub fn commit_update(&mut self, mirror: &ClientMirror) -> bool {
        let Some(gesture) = self.gesture.take() else {
            return false;
        };

        let mut changed: Vec<HistoryAction> = gesture
            .before
            .into_iter()
            .filter_map(|(id, before)| {
                let after = ObjectState::capture(mirror.get(id)?);
                (after != before).then_some(HistoryAction::Update { id, before, after })
            })
            .collect();

        match changed.len() {
            0 => false,
            1 => {
                if let Some(action) = changed.pop() {
                    self.push(action);
                }
                true
            }
            _ => {
                self.push(HistoryAction::Group(changed));
                true
            }
        }
    }

    pub fn cancel_update(&mut self) {
        self.gesture = None;
    }

    pub fn is_gesture_active(&self) -> bool {
        self.gesture.is_some()
    }

    /// Revert the action before the cursor. Returns false if there was none.
    pub fn undo(&mut self, mirror: &mut ClientMirror, replicator: &dyn Replicator) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        let mut steps = Vec::new();
        self.actions[self.cursor].undo_steps(&mut steps);
        let applied = run_steps(steps, mirror, replicator);
        debug!(action = self.actions[self.cursor].label(), applied, "undo");
        true
    }

    /// Re-apply the action at the cursor. Returns false if there was none.
    pub fn redo(&mut self, mirror: &mut ClientMirror, replicator: &dyn Replicator) -> bool {
        if !self.can_redo() {
            return false;
        }
        let mut steps = Vec::new();
        self.actions[self.cursor].redo_steps(&mut steps);
        let applied = run_steps(steps, mirror, replicator);
        debug!(action = self.actions[self.cursor].label(), applied, "redo");
        self.cursor += 1;
        true
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.actions.len()
    }

    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn redo_count(&self) -> usize {
        self.actions.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Action that the next undo would revert
    pub fn peek_undo(&self) -> Option<&HistoryAction> {
        self.cursor.checked_sub(1).and_then(|i| self.actions.get(i))
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.cursor = 0;
        self.gesture = None;
    }
}

fn run_steps(steps: Vec<Step>, mirror: &mut ClientMirror, replicator: &dyn Replicator) -> usize {
    steps
        .into_iter()
        .map(|step| step.run(mirror, replicator))
        .filter(|applied| *applied)
        .count()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use proptest::prelude::*;
    use scenesync_core::{NewObject, RoomId, UserId};
    use scenesync_geometry::Vec3;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Create(ObjectId),
        Update(ObjectId, ObjectPatch),
        Delete(ObjectId),
    }

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<Sent>>,
    }

    impl Replicator for Recorder {
        fn create(&self, object: &SceneObject) {
            self.sent.borrow_mut().push(Sent::Create(object.id));
        }
        fn update(&self, id: ObjectId, patch: ObjectPatch) {
            self.sent.borrow_mut().push(Sent::Update(id, patch));
        }
        fn delete(&self, id: ObjectId) {
            self.sent.borrow_mut().push(Sent::Delete(id));
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    fn mirror() -> ClientMirror {
        let mut mirror = ClientMirror::new(&ClientConfig::default(), UserId::new("me"));
        mirror.apply_room_state(RoomId::new("r"), Vec::new(), Vec::new());
        mirror
    }

    #[test]
    fn undo_create_then_redo_restores_identical_object() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();

        let object = mirror.create_local(
            NewObject::new("box").with_color(Color::rgb(1, 2, 3)),
        );
        history.push_create(&object);

        assert!(history.undo(&mut mirror, &net));
        assert!(!mirror.contains(object.id));
        assert_eq!(net.take(), vec![Sent::Delete(object.id)]);

        assert!(history.redo(&mut mirror, &net));
        assert_eq!(mirror.get(object.id), Some(&object));
        assert_eq!(net.take(), vec![Sent::Create(object.id)]);
    }

    #[test]
    fn noop_gesture_records_nothing() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let object = mirror.create_local(NewObject::new("box"));

        history.begin_update(&mirror, &[object.id]);
        // Drag away and back
        mirror.update_local(object.id, &ObjectPatch::position(Vec3::ONE));
        mirror.update_local(object.id, &ObjectPatch::position(Vec3::ZERO));
        assert!(!history.commit_update(&mirror));
        assert!(history.is_empty());
        assert!(!history.can_undo());
    }

    #[test]
    fn update_undo_restores_before_and_replicates_only_changed_fields() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let object = mirror.create_local(NewObject::new("box"));

        history.begin_update(&mirror, &[object.id]);
        mirror.update_local(object.id, &ObjectPatch::position(Vec3::new(4.0, 0.0, 0.0)));
        assert!(history.commit_update(&mirror));

        history.undo(&mut mirror, &net);
        assert_eq!(mirror.get(object.id).unwrap().transform.position, Vec3::ZERO);
        assert_eq!(
            net.take(),
            vec![Sent::Update(object.id, ObjectPatch::position(Vec3::ZERO))]
        );

        history.redo(&mut mirror, &net);
        assert_eq!(
            mirror.get(object.id).unwrap().transform.position,
            Vec3::new(4.0, 0.0, 0.0)
        );
    }

    #[test]
    fn multi_object_gesture_is_one_group() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let a = mirror.create_local(NewObject::new("a"));
        let b = mirror.create_local(NewObject::new("b"));

        history.begin_update(&mirror, &[a.id, b.id]);
        mirror.update_local(a.id, &ObjectPatch::position(Vec3::ONE));
        mirror.update_local(b.id, &ObjectPatch::color(Color::rgb(9, 9, 9)));
        assert!(history.commit_update(&mirror));
        assert_eq!(history.len(), 1);
        assert_eq!(history.peek_undo().map(HistoryAction::label), Some("group"));

        history.undo(&mut mirror, &net);
        assert_eq!(mirror.get(a.id).unwrap().transform.position, Vec3::ZERO);
        assert_eq!(mirror.get(b.id).unwrap().color, Color::default());
        assert_eq!(net.take().len(), 2);
    }

    #[test]
    fn delete_undo_resurrects_every_object() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let a = mirror.create_local(NewObject::new("a"));
        let b = mirror.create_local(NewObject::new("b"));

        let removed = vec![
            mirror.delete_local(a.id).unwrap(),
            mirror.delete_local(b.id).unwrap(),
        ];
        history.push_delete(removed);
        assert!(mirror.is_empty());

        history.undo(&mut mirror, &net);
        assert_eq!(mirror.get(a.id), Some(&a));
        assert_eq!(mirror.get(b.id), Some(&b));

        history.redo(&mut mirror, &net);
        assert!(mirror.is_empty());
    }

    #[test]
    fn boolean_undo_restores_both_shapes() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let target = mirror.create_local(
            NewObject::new("mesh").with_geometry(GeometryPayload::new(vec![1])),
        );
        let cutter = mirror.create_local(NewObject::new("sphere"));

        // Perform the boolean locally
        let result = GeometryPayload::new(vec![1, 2]);
        mirror.update_local(target.id, &ObjectPatch::geometry(result.clone()));
        let cutting = mirror.delete_local(cutter.id).unwrap();
        history.push_boolean(
            BooleanTarget {
                id: target.id,
                before_geometry: target.geometry.clone(),
                after_geometry: result.clone(),
            },
            cutting,
        );

        history.undo(&mut mirror, &net);
        assert_eq!(mirror.get(target.id).unwrap().geometry, target.geometry);
        assert_eq!(mirror.get(cutter.id), Some(&cutter));
        assert_eq!(
            net.take(),
            vec![
                Sent::Create(cutter.id),
                Sent::Update(target.id, ObjectPatch::geometry(target.geometry.clone())),
            ]
        );

        history.redo(&mut mirror, &net);
        assert_eq!(mirror.get(target.id).unwrap().geometry, result);
        assert!(!mirror.contains(cutter.id));
    }

    #[test]
    fn ai_bulk_reverses_every_entry() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let existing = mirror.create_local(NewObject::new("cube"));
        let doomed = mirror.create_local(NewObject::new("cone"));

        // An agent creates one object, moves one and deletes one
        let created = mirror.create_local(NewObject::new("torus"));
        mirror.update_local(existing.id, &ObjectPatch::position(Vec3::new(0.0, 3.0, 0.0)));
        let moved = mirror.get(existing.id).unwrap().clone();
        let deleted = mirror.delete_local(doomed.id).unwrap();
        history.push_ai_bulk(
            "make a little scene",
            vec![
                BulkEntry::Created(created.clone()),
                BulkEntry::Updated {
                    before: existing.clone(),
                    after: moved,
                },
                BulkEntry::Deleted(deleted),
            ],
        );

        history.undo(&mut mirror, &net);
        assert!(!mirror.contains(created.id));
        assert_eq!(mirror.get(existing.id).unwrap().transform.position, Vec3::ZERO);
        assert_eq!(mirror.get(doomed.id), Some(&doomed));
        assert_eq!(net.take().len(), 3);

        history.redo(&mut mirror, &net);
        assert!(mirror.contains(created.id));
        assert!(!mirror.contains(doomed.id));
        assert_eq!(
            mirror.get(existing.id).unwrap().transform.position,
            Vec3::new(0.0, 3.0, 0.0)
        );
    }

    #[test]
    fn missing_target_degrades_to_noop() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let object = mirror.create_local(NewObject::new("box"));
        history.begin_update(&mirror, &[object.id]);
        mirror.update_local(object.id, &ObjectPatch::position(Vec3::ONE));
        history.commit_update(&mirror);

        // A peer deleted it in the meantime
        mirror.apply_remote_deleted(object.id);

        assert!(history.undo(&mut mirror, &net));
        assert!(net.take().is_empty());
        assert!(!mirror.contains(object.id));
        assert!(history.can_redo());
    }

    #[test]
    fn push_truncates_redo_tail() {
        let mut mirror = mirror();
        let mut history = HistoryEngine::default();
        let net = Recorder::default();
        let a = mirror.create_local(NewObject::new("a"));
        history.push_create(&a);
        let b = mirror.create_local(NewObject::new("b"));
        history.push_create(&b);

        history.undo(&mut mirror, &net);
        assert_eq!(history.redo_count(), 1);
        let c = mirror.create_local(NewObject::new("c"));
        history.push_create(&c);
        assert_eq!(history.redo_count(), 0);
        assert_eq!(history.undo_count(), 2);
        assert!(!history.redo(&mut mirror, &net));
    }

    #[test]
    fn depth_is_bounded() {
        let mut history = HistoryEngine::new(3);
        for i in 0..5 {
            let object = NewObject::new(format!("o{i}")).into_object(
                RoomId::new("r"),
                UserId::new("me"),
                0,
            );
            history.push_create(&object);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.undo_count(), 3);
        match history.peek_undo() {
            Some(HistoryAction::Create { object }) => assert_eq!(object.kind, "o4"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push,
        Undo,
        Redo,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Push), Just(Op::Undo), Just(Op::Redo)]
    }

    proptest! {
        #[test]
        fn cursor_stays_in_bounds(ops in prop::collection::vec(op(), 0..60), depth in 1usize..10) {
            let mut mirror = mirror();
            let mut history = HistoryEngine::new(depth);
            let net = Recorder::default();

            for op in ops {
                let before = (history.undo_count(), history.redo_count());
                match op {
                    Op::Push => {
                        let object = mirror.create_local(NewObject::new("p"));
                        history.push_create(&object);
                        prop_assert_eq!(history.redo_count(), 0);
                    }
                    Op::Undo => {
                        let did = history.undo(&mut mirror, &net);
                        prop_assert_eq!(did, before.0 > 0);
                        if did {
                            prop_assert_eq!(history.undo_count(), before.0 - 1);
                            prop_assert_eq!(history.redo_count(), before.1 + 1);
                        }
                    }
                    Op::Redo => {
                        let did = history.redo(&mut mirror, &net);
                        prop_assert_eq!(did, before.1 > 0);
                        if did {
                            prop_assert_eq!(history.undo_count(), before.0 + 1);
                        }
                    }
                }
                prop_assert!(history.len() <= depth);
                prop_assert_eq!(history.undo_count() + history.redo_count(), history.len());
                prop_assert_eq!(history.can_undo(), history.undo_count() > 0);
                prop_assert_eq!(history.can_redo(), history.redo_count() > 0);
            }
        }
    }
}
