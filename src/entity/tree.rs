use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::entity::Entity;
use super::{EntityError, EntityId};

impl Entity {
    // ── Ownership ─────────────────────────────────────────────────────────

    pub fn owner(&self) -> Option<Arc<Entity>> {
        self.tree.lock().owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn owner_id(&self) -> Option<EntityId> {
        self.owner().map(|o| o.id().to_string())
    }

    /// Owned children in insertion order
    pub fn children(&self) -> Vec<Arc<Entity>> {
        self.tree.lock().children.clone()
    }

    /// Top of this entity's ownership chain (itself when unowned)
    pub fn root_or_self(&self) -> Option<Arc<Entity>> {
        let mut current = self.arc()?;
        let mut visited = HashSet::new();
        visited.insert(current.id().to_string());
        while let Some(owner) = current.owner() {
            if !visited.insert(owner.id().to_string()) {
                break;
            }
            current = owner;
        }
        Some(current)
    }

    /// Assign `candidate` as this entity's owner.
    ///
    /// Setting the current owner again is a no-op. Owner reassignment is
    /// unsupported: a different owner fails with `OwnershipConflict`. On
    /// success, inherited config is refreshed from the new owner and this
    /// entity is registered as its child.
    pub fn set_owner(self: &Arc<Self>, candidate: &Arc<Entity>) -> Result<(), EntityError> {
        self.ensure_live()?;
        candidate.ensure_live()?;

        let _ownership = self.ownership.lock();

        if let Some(current) = self.owner() {
            if current.id() == candidate.id() {
                return Ok(());
            }
            return Err(EntityError::OwnershipConflict {
                entity: self.id().to_string(),
                current: current.id().to_string(),
                candidate: candidate.id().to_string(),
            });
        }

        if self.id() == candidate.id() || self.is_descendant(candidate) {
            return Err(EntityError::CycleDetected {
                entity: self.id().to_string(),
                candidate: candidate.id().to_string(),
            });
        }

        // Owner first: a concurrent config change on the owner either lands
        // before this refresh or sees this entity among its children
        let _propagation = candidate.config.propagation_lock();
        self.tree.lock().owner = Some(Arc::downgrade(candidate));
        self.refresh_inherited_config();
        candidate.register_child(self);

        info!(
            entity_id = %self.id(),
            owner_id = %candidate.id(),
            "Owner assigned"
        );
        Ok(())
    }

    /// Make `child` an owned child of this entity. Returns the child.
    pub fn add_owned_child(self: &Arc<Self>, child: &Arc<Entity>) -> Result<Arc<Entity>, EntityError> {
        if child.id() == self.id() || self.is_ancestor(child) {
            return Err(EntityError::CycleDetected {
                entity: child.id().to_string(),
                candidate: self.id().to_string(),
            });
        }
        child.set_owner(self)?;
        self.register_child(child);
        Ok(Arc::clone(child))
    }

    fn register_child(&self, child: &Arc<Entity>) {
        let mut tree = self.tree.lock();
        if !tree.children.iter().any(|c| c.id() == child.id()) {
            tree.children.push(Arc::clone(child));
        }
    }

    /// Remove `child` from this entity's children and clear its owner.
    /// Returns false if it was not a child.
    pub fn remove_owned_child(&self, child: &Entity) -> bool {
        let removed = {
            let mut tree = self.tree.lock();
            let before = tree.children.len();
            tree.children.retain(|c| c.id() != child.id());
            tree.children.len() != before
        };

        let _ownership = child.ownership.lock();
        let owned_by_self = child.owner_id().as_deref() == Some(self.id());
        if owned_by_self {
            child.tree.lock().owner = None;
            child.refresh_inherited_config();
        }

        if removed {
            info!(entity_id = %child.id(), owner_id = %self.id(), "Owner cleared");
        }
        removed
    }

    /// Whether `candidate` is somewhere above this entity in the tree
    pub fn is_ancestor(&self, candidate: &Entity) -> bool {
        let mut visited = HashSet::new();
        let mut current = self.owner();
        while let Some(entity) = current {
            if entity.id() == candidate.id() {
                return true;
            }
            if !visited.insert(entity.id().to_string()) {
                return false;
            }
            current = entity.owner();
        }
        false
    }

    /// Whether `candidate` is somewhere below this entity (breadth-first)
    pub fn is_descendant(&self, candidate: &Entity) -> bool {
        let mut visited = HashSet::new();
        visited.insert(self.id().to_string());
        let mut queue: VecDeque<Arc<Entity>> = self.children().into();
        while let Some(entity) = queue.pop_front() {
            if entity.id() == candidate.id() {
                return true;
            }
            if visited.insert(entity.id().to_string()) {
                queue.extend(entity.children());
            }
        }
        false
    }

    /// This entity and everything below it, breadth-first
    pub fn descendants_and_self(&self) -> Vec<Arc<Entity>> {
        let Some(me) = self.arc() else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([me]);
        while let Some(entity) = queue.pop_front() {
            if !visited.insert(entity.id().to_string()) {
                continue;
            }
            queue.extend(entity.children());
            out.push(entity);
        }
        out
    }

    // ── Group membership ──────────────────────────────────────────────────

    /// Add `member` to this group. Returns false if already a member.
    ///
    /// Membership is many-to-many and weak on both sides; no cycle check.
    pub fn add_member(&self, member: &Arc<Entity>) -> Result<bool, EntityError> {
        self.ensure_live()?;
        member.ensure_live()?;
        let Some(group) = self.arc() else {
            return Err(EntityError::EntityDestroyed(self.id().to_string()));
        };

        {
            let mut memberships = self.memberships.lock();
            memberships.members.retain(|m| m.strong_count() > 0);
            if memberships
                .members
                .iter()
                .filter_map(Weak::upgrade)
                .any(|m| m.id() == member.id())
            {
                return Ok(false);
            }
            memberships.members.push(Arc::downgrade(member));
        }
        member
            .memberships
            .lock()
            .groups
            .push(Arc::downgrade(&group));

        debug!(group_id = %self.id(), member_id = %member.id(), "Member added");
        Ok(true)
    }

    pub fn remove_member(&self, member: &Entity) -> bool {
        let removed = {
            let mut memberships = self.memberships.lock();
            let before = memberships.members.len();
            memberships
                .members
                .retain(|m| m.upgrade().is_some_and(|m| m.id() != member.id()));
            memberships.members.len() != before
        };
        member
            .memberships
            .lock()
            .groups
            .retain(|g| g.upgrade().is_some_and(|g| g.id() != self.id()));
        removed
    }

    pub fn members(&self) -> Vec<Arc<Entity>> {
        self.memberships
            .lock()
            .members
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn groups(&self) -> Vec<Arc<Entity>> {
        self.memberships
            .lock()
            .groups
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn group_ids(&self) -> Vec<EntityId> {
        self.groups().iter().map(|g| g.id().to_string()).collect()
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Destroy this entity and its subtree.
    ///
    /// Children go first. Policies are detached, memberships dropped,
    /// subscriptions cancelled, and the entity is unlinked from its owner and
    /// the management registry. A destroyed entity cannot rejoin the tree.
    pub fn destroy(&self) {
        if !self.mark_destroyed() {
            return;
        }

        for child in self.children() {
            child.destroy();
        }

        for hook in self.take_policies() {
            hook.detach();
        }

        for group in self.groups() {
            group.remove_member(self);
        }
        for member in self.members() {
            self.remove_member(&member);
        }

        if let Some(owner) = self.owner() {
            owner.remove_owned_child(self);
        }

        if let Ok(subscriptions) = self.subscriptions() {
            subscriptions.unsubscribe_all();
        }
        if let Ok(management) = self.management() {
            management.unregister(self.id());
        }

        info!(entity_id = %self.id(), name = %self.display_name(), "Entity destroyed");
    }
}
