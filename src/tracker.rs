use crate::models::PositionMapping;
use ahash::AHashMap;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Result of comparing tracked mappings against the live position sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Orphans {
    /// Master tickets tracked but no longer open on the master account.
    pub orphaned_master: Vec<i64>,
    /// Master tickets whose slave position is no longer open.
    pub orphaned_slave: Vec<i64>,
}

/// Master → slave position mapping store with write-through JSON persistence.
///
/// Every mutation rewrites the whole backing file, so a crash between two
/// mutations loses at most the latest one. The in-memory map stays
/// authoritative when a save fails; the next successful mutation persists
/// everything again.
pub struct PositionTracker {
    mappings: AHashMap<i64, PositionMapping>,
    backup_file: PathBuf,
}

impl PositionTracker {
    pub fn new(backup_file: impl Into<PathBuf>) -> Self {
        Self {
            mappings: AHashMap::new(),
            backup_file: backup_file.into(),
        }
    }

    pub fn count(&self) -> usize {
        self.mappings.len()
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_file
    }

    // ===== CRUD =====

    pub fn add_mapping(&mut self, mapping: PositionMapping) {
        debug!(
            "Mapping added: master #{} -> slave #{} ({} {})",
            mapping.master_ticket, mapping.slave_ticket, mapping.symbol, mapping.direction
        );
        self.mappings.insert(mapping.master_ticket, mapping);
        self.save();
    }

    pub fn remove_mapping(&mut self, master_ticket: i64) {
        if let Some(mapping) = self.mappings.remove(&master_ticket) {
            debug!(
                "Mapping removed: master #{} -> slave #{}",
                master_ticket, mapping.slave_ticket
            );
            self.save();
        }
    }

    pub fn get_mapping(&self, master_ticket: i64) -> Option<&PositionMapping> {
        self.mappings.get(&master_ticket)
    }

    pub fn get_slave_ticket(&self, master_ticket: i64) -> Option<i64> {
        self.mappings.get(&master_ticket).map(|m| m.slave_ticket)
    }

    pub fn has_mapping(&self, master_ticket: i64) -> bool {
        self.mappings.contains_key(&master_ticket)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &PositionMapping> {
        self.mappings.values()
    }

    /// Update stored SL/TP after a successful modify. Master and slave copies
    /// are kept equal: the copy ratio is 1:1.
    pub fn update_sl_tp(&mut self, master_ticket: i64, sl: Option<f64>, tp: Option<f64>) {
        if let Some(mapping) = self.mappings.get_mut(&master_ticket) {
            if let Some(sl) = sl {
                mapping.slave_sl = sl;
                mapping.master_sl = sl;
            }
            if let Some(tp) = tp {
                mapping.slave_tp = tp;
                mapping.master_tp = tp;
            }
            self.save();
        }
    }

    /// Update the tracked slave volume after a successful partial close.
    pub fn update_slave_volume(&mut self, master_ticket: i64, new_slave_volume: f64) {
        if let Some(mapping) = self.mappings.get_mut(&master_ticket) {
            mapping.slave_volume = new_slave_volume;
            self.save();
        }
    }

    // ===== Persistence =====

    /// Persist the whole mapping set. Failure is logged, never raised: the
    /// in-memory map remains authoritative until the next successful save.
    pub fn save(&self) {
        let data: BTreeMap<String, &PositionMapping> = self
            .mappings
            .iter()
            .map(|(ticket, mapping)| (ticket.to_string(), mapping))
            .collect();
        let json = match serde_json::to_string_pretty(&data) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize mappings: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.backup_file, json) {
            error!(
                "Failed to save mappings to {}: {e}",
                self.backup_file.display()
            );
        }
    }

    /// Rebuild the in-memory map from the backing file. A missing file means
    /// a fresh start; a corrupt file is logged and treated as empty.
    pub fn load(&mut self) {
        if !self.backup_file.exists() {
            info!("No mapping backup found, starting fresh");
            return;
        }

        let raw = match std::fs::read_to_string(&self.backup_file) {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    "Failed to read mappings from {}: {e}",
                    self.backup_file.display()
                );
                return;
            }
        };

        match serde_json::from_str::<BTreeMap<String, PositionMapping>>(&raw) {
            Ok(data) => {
                self.mappings = data
                    .into_values()
                    .map(|m| (m.master_ticket, m))
                    .collect();
                info!("Loaded {} mappings from backup", self.mappings.len());
                for m in self.mappings.values() {
                    debug!(
                        "  master #{} -> slave #{} ({} {} {} lot)",
                        m.master_ticket, m.slave_ticket, m.symbol, m.direction, m.slave_volume
                    );
                }
            }
            Err(e) => {
                error!(
                    "Failed to parse mappings from {}: {e}",
                    self.backup_file.display()
                );
                self.mappings = AHashMap::new();
            }
        }
    }

    // ===== Reconciliation =====

    /// Pure comparison of tracked mappings against live ticket sets; performs
    /// no mutation.
    pub fn sync_check(
        &self,
        master_tickets: &HashSet<i64>,
        slave_tickets: &HashSet<i64>,
    ) -> Orphans {
        let mut orphans = Orphans::default();
        for (master_ticket, mapping) in self.mappings.iter() {
            if !master_tickets.contains(master_ticket) {
                warn!("Orphaned mapping: master #{master_ticket} not found on terminal");
                orphans.orphaned_master.push(*master_ticket);
            }
            if !slave_tickets.contains(&mapping.slave_ticket) {
                warn!(
                    "Orphaned mapping: slave #{} not found on terminal",
                    mapping.slave_ticket
                );
                orphans.orphaned_slave.push(*master_ticket);
            }
        }
        orphans
    }

    /// Remove the given mappings, persisting once at the end.
    pub fn cleanup_orphaned(&mut self, master_tickets: &[i64]) {
        let mut removed = 0usize;
        for ticket in master_tickets {
            if self.mappings.remove(ticket).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.save();
            info!("Cleaned up {removed} orphaned mappings");
        }
    }
}
