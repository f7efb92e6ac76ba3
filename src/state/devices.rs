use crate::state::{
    ids::{DeviceId, PlayerId},
    roster::PresenceSource,
};

/// One device of the pool and its current holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Platform identifier of the device.
    pub device_id: DeviceId,
    /// Player currently holding the device.
    pub assigned_player: Option<PlayerId>,
    /// Whether the device is handed out. Always `false` without a holder.
    pub in_use: bool,
}

impl DeviceRecord {
    fn free(device_id: DeviceId) -> Self {
        Self {
            device_id,
            assigned_player: None,
            in_use: false,
        }
    }

    fn is_free(&self) -> bool {
        self.assigned_player.is_none()
    }

    fn clear(&mut self) -> Option<PlayerId> {
        self.in_use = false;
        self.assigned_player.take()
    }
}

/// Fixed pool of devices handed out to present players, at most one each.
///
/// Running out of devices is a normal outcome (`None`); callers retry on the next release.
#[derive(Debug, Clone, Default)]
pub struct DeviceAssignmentManager {
    devices: Vec<DeviceRecord>,
}

impl DeviceAssignmentManager {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from device identifiers, skipping duplicates.
    pub fn with_devices(ids: impl IntoIterator<Item = DeviceId>) -> Self {
        let mut manager = Self::new();
        for id in ids {
            manager.register_device(id);
        }
        manager
    }

    /// Append a free device to the pool. Returns `false` when it was already registered.
    pub fn register_device(&mut self, device_id: DeviceId) -> bool {
        if self.devices.iter().any(|record| record.device_id == device_id) {
            return false;
        }
        self.devices.push(DeviceRecord::free(device_id));
        true
    }

    /// Give `player` a device, or return the one they already hold.
    pub fn assign(&mut self, player: &PlayerId) -> Option<DeviceId> {
        if let Some(existing) = self.lookup(player) {
            return Some(existing);
        }

        let record = self.devices.iter_mut().find(|record| record.is_free())?;
        record.assigned_player = Some(player.clone());
        record.in_use = true;
        Some(record.device_id.clone())
    }

    /// Take back the device held by `player`, if any.
    pub fn release(&mut self, player: &PlayerId) -> Option<DeviceId> {
        let record = self
            .devices
            .iter_mut()
            .find(|record| record.assigned_player.as_ref() == Some(player))?;
        record.clear();
        Some(record.device_id.clone())
    }

    /// Free a specific device and hand it to the first present player without one.
    ///
    /// The player who held it is skipped. Returns the new holder.
    pub fn release_by_device(
        &mut self,
        device_id: &DeviceId,
        presence: &impl PresenceSource,
    ) -> Option<PlayerId> {
        let position = self
            .devices
            .iter()
            .position(|record| &record.device_id == device_id)?;
        let previous = self.devices[position].clear();

        let next = presence.present_ids().into_iter().find(|candidate| {
            Some(candidate) != previous.as_ref() && self.lookup(candidate).is_none()
        })?;

        let record = &mut self.devices[position];
        record.assigned_player = Some(next.clone());
        record.in_use = true;
        Some(next)
    }

    /// Hand free devices to present players without one, in presence order.
    pub fn assign_waiting(&mut self, presence: &impl PresenceSource) -> Vec<(PlayerId, DeviceId)> {
        let mut assigned = Vec::new();
        for player in presence.present_ids() {
            if self.free_count() == 0 {
                break;
            }
            if self.lookup(&player).is_some() {
                continue;
            }
            if let Some(device) = self.assign(&player) {
                assigned.push((player, device));
            }
        }
        assigned
    }

    /// Device currently held by `player`.
    pub fn lookup(&self, player: &PlayerId) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|record| record.assigned_player.as_ref() == Some(player))
            .map(|record| record.device_id.clone())
    }

    /// Number of devices without a holder.
    pub fn free_count(&self) -> usize {
        self.devices.iter().filter(|record| record.is_free()).count()
    }

    /// Every device record, in registration order.
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }
}
