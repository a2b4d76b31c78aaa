use dashmap::{DashMap, mapref::entry::Entry};
use log::trace;

use crate::transport::{Contact, GroupLookup, GroupMetadata};

#[derive(Debug, Clone)]
struct Observed<T> {
    value: T,
    observed_at: u64,
}

/// In-memory roster of groups and contacts.
///
/// Entries are keyed by id and carry the time they were observed. An upsert only
/// replaces an entry that is not newer than the incoming one, so a slow refresh
/// started before an update event cannot overwrite the event value.
///
/// # Examples
///
/// ```ignore
/// # use ronron::metadata::MetadataCache;
/// # use ronron::transport::GroupMetadata;
/// let cache = MetadataCache::new();
/// let group = GroupMetadata { id: "team@g".to_string(), subject: "Team".to_string(), ..Default::default() };
///
/// assert!(cache.upsert_group(group, 10));
/// assert_eq!(cache.group("team@g").unwrap().subject, "Team");
/// ```
#[derive(Debug, Default)]
pub struct MetadataCache {
    groups: DashMap<String, Observed<GroupMetadata>>,
    contacts: DashMap<String, Observed<Contact>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        MetadataCache::default()
    }

    /// Inserts or replaces a group.
    ///
    /// # Returns
    ///
    /// `false` when the cached entry was observed later and is kept.
    pub fn upsert_group(&self, group: GroupMetadata, observed_at: u64) -> bool {
        upsert(&self.groups, group.id.clone(), group, observed_at)
    }

    /// Applies a partial group update onto the cached group, in place.
    ///
    /// Fields left empty in `update` keep their cached value. An unknown group is
    /// inserted as is.
    ///
    /// # Returns
    ///
    /// `false` when the cached entry was observed later and is kept.
    pub fn merge_group(&self, update: GroupMetadata, observed_at: u64) -> bool {
        match self.groups.entry(update.id.clone()) {
            Entry::Occupied(mut entry) => {
                let cached = entry.get_mut();
                if cached.observed_at > observed_at {
                    trace!("keep newer group {}", update.id);
                    return false;
                }
                merge_fields(&mut cached.value, update);
                cached.observed_at = observed_at;
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Observed {
                    value: update,
                    observed_at,
                });
                true
            }
        }
    }

    /// Inserts or replaces a contact, see [`MetadataCache::upsert_group`].
    pub fn upsert_contact(&self, contact: Contact, observed_at: u64) -> bool {
        upsert(&self.contacts, contact.id.clone(), contact, observed_at)
    }

    pub fn group(&self, group_id: &str) -> Option<GroupMetadata> {
        self.groups.get(group_id).map(|entry| entry.value.clone())
    }

    /// Returns every cached group sorted by subject.
    pub fn groups(&self) -> Vec<GroupMetadata> {
        let mut groups: Vec<GroupMetadata> = self
            .groups
            .iter()
            .map(|entry| entry.value.clone())
            .collect();
        groups.sort_by(|a, b| a.subject.cmp(&b.subject).then_with(|| a.id.cmp(&b.id)));
        groups
    }

    /// Returns every cached group with its observation time.
    pub fn group_snapshot(&self) -> Vec<(GroupMetadata, u64)> {
        self.groups
            .iter()
            .map(|entry| (entry.value.clone(), entry.observed_at))
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Best display name known for a contact.
    pub fn contact_name(&self, contact_id: &str) -> Option<String> {
        self.contacts
            .get(contact_id)
            .and_then(|entry| entry.value.name.clone().or(entry.value.notify.clone()))
    }
}

fn upsert<T>(map: &DashMap<String, Observed<T>>, id: String, value: T, observed_at: u64) -> bool {
    match map.entry(id) {
        Entry::Occupied(mut entry) => {
            if entry.get().observed_at > observed_at {
                trace!("keep newer entry {}", entry.key());
                return false;
            }
            entry.insert(Observed { value, observed_at });
            true
        }
        Entry::Vacant(entry) => {
            entry.insert(Observed { value, observed_at });
            true
        }
    }
}

fn merge_fields(cached: &mut GroupMetadata, update: GroupMetadata) {
    if !update.subject.is_empty() {
        cached.subject = update.subject;
    }
    if update.owner.is_some() {
        cached.owner = update.owner;
    }
    if update.description.is_some() {
        cached.description = update.description;
    }
    if update.creation.is_some() {
        cached.creation = update.creation;
    }
    if !update.participants.is_empty() {
        cached.participants = update.participants;
    }
}

impl GroupLookup for MetadataCache {
    fn group_metadata(&self, group_id: &str) -> Option<GroupMetadata> {
        self.group(group_id)
    }
}
