//! Cross-switch long-press correlation.
//!
//! Footswitches stamp the groups they belong to when they report a long
//! press. Once per poll cycle [`LongpressCoordinator::resolve`] decides
//! whether a group fires as a single action, as a combined action of two
//! switches held together, or keeps waiting.
//!
//! The coordinator is owned by the poll loop and handed to footswitches by
//! `&mut` reference, so it needs no internal locking.

use crate::clock::Timestamp;
use crate::controller::switch::SwitchId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// One switch held alone
    Single,
    /// Two or more switches held within the correlation window
    Combined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupFire {
    pub group: String,
    pub resolution: Resolution,
    pub switches: Vec<SwitchId>,
}

pub type LongpressCallback = Box<dyn FnMut(&GroupFire) + Send>;

pub struct LongpressGroup {
    name: String,
    required_members: usize,
    pending: HashMap<SwitchId, Timestamp>,
    callback: LongpressCallback,
}

impl LongpressGroup {
    pub fn new(name: impl Into<String>, required_members: usize, callback: LongpressCallback) -> Self {
        Self {
            name: name.into(),
            required_members: required_members.max(1),
            pending: HashMap::new(),
            callback,
        }
    }

    fn check(&self, now: Timestamp, window: f64) -> Option<Resolution> {
        match self.pending.len() {
            0 => None,
            1 => {
                let stamp = self.pending.values().next().copied()?;
                (self.required_members == 1 && now - stamp >= window).then_some(Resolution::Single)
            }
            _ => {
                let mut stamps: Vec<Timestamp> = self.pending.values().copied().collect();
                stamps.sort_by(|a, b| b.total_cmp(a));
                (stamps[0] - stamps[1] < window).then_some(Resolution::Combined)
            }
        }
    }
}

pub struct LongpressCoordinator {
    groups: Vec<LongpressGroup>,
    correlation_window: f64,
}

impl LongpressCoordinator {
    /// The group set is closed from here on.
    pub fn new(correlation_window: f64, groups: Vec<LongpressGroup>) -> Self {
        info!(
            "Longpress coordinator with {} groups, {:.2}s correlation window",
            groups.len(),
            correlation_window
        );
        Self {
            groups,
            correlation_window,
        }
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|group| group.name == name)
    }

    /// Checks that every referenced group is registered.
    /// The first unknown name is the error.
    pub fn validate_groups<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
        match names.into_iter().find(|name| !self.has_group(name)) {
            Some(unknown) => Err(unknown.to_string()),
            None => Ok(()),
        }
    }

    /// Overwrites the pending stamp of `switch_id` in `group_name`.
    /// Unknown groups are ignored.
    pub fn register_longpress(&mut self, switch_id: SwitchId, group_name: &str, now: Timestamp) {
        match self.groups.iter_mut().find(|group| group.name == group_name) {
            Some(group) => {
                debug!(
                    "Switch {} stamped longpress group '{}' at {:.3}",
                    switch_id, group_name, now
                );
                group.pending.insert(switch_id, now);
            }
            None => debug!(
                "Switch {} referenced unknown longpress group '{}'",
                switch_id, group_name
            ),
        }
    }

    pub fn pending_count(&self, group_name: &str) -> usize {
        self.groups
            .iter()
            .find(|group| group.name == group_name)
            .map_or(0, |group| group.pending.len())
    }

    /// Fires at most one group per call. Any firing clears every group.
    pub fn resolve(&mut self, now: Timestamp) -> Option<GroupFire> {
        let window = self.correlation_window;
        let group = self
            .groups
            .iter_mut()
            .find(|group| group.check(now, window).is_some())?;
        let resolution = group.check(now, window)?;

        let mut switches: Vec<SwitchId> = group.pending.keys().copied().collect();
        switches.sort_unstable();
        let fire = GroupFire {
            group: group.name.clone(),
            resolution,
            switches,
        };
        info!(
            "Longpress group '{}' fired {:?} for switches {:?}",
            fire.group, fire.resolution, fire.switches
        );
        (group.callback)(&fire);

        for group in &mut self.groups {
            group.pending.clear();
        }
        Some(fire)
    }
}
