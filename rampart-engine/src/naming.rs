//! Bidirectional operator-name ↔ `(uid, typename)` mapping atop the KV (§4.8).
use crate::job::TraderType;
use rampart_integration::{error::Error, kv::Kv};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct NameEntry {
    pub name: String,
    pub uid: Uuid,
    pub typename: TraderType,
}

/// `/names/<md5(name)>` → `NameEntry`, with a secondary `/by-id/<uid>` → `name` index for reverse
/// lookup. Renames are atomic within one KV transaction.
pub struct Naming {
    kv: Arc<dyn Kv>,
}

impl std::fmt::Debug for Naming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Naming").finish()
    }
}

/// `/names/<md5(name)>`, per §6's persisted keyspace layout.
fn name_key(name: &str) -> Vec<u8> {
    let digest = md5::compute(name.as_bytes());
    format!("/names/{digest:x}").into_bytes()
}

fn by_id_key(uid: Uuid) -> Vec<u8> {
    format!("/by-id/{uid}").into_bytes()
}

impl Naming {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Assigns `name` to `uid`. Fails if `name` is already taken by a different uid, or if `uid`
    /// already has a different name (renames go through [`Naming::rename`]).
    pub fn set_name(&self, name: &str, uid: Uuid, typename: TraderType) -> Result<(), Error> {
        self.kv.with_read_writer(&mut |tx| {
            if let Some(bytes) = tx.get(&name_key(name))? {
                let existing: NameEntry =
                    serde_json::from_slice(&bytes).map_err(|err| Error::internal(err.to_string()))?;
                if existing.uid != uid {
                    return Err(Error::exist(format!("name {name} is already taken")));
                }
            }

            if let Some(bytes) = tx.get(&by_id_key(uid))? {
                let existing_name =
                    String::from_utf8(bytes).map_err(|err| Error::internal(err.to_string()))?;
                if existing_name != name {
                    tx.delete(&name_key(&existing_name))?;
                }
            }

            let entry = NameEntry { name: name.to_string(), uid, typename };
            let bytes = serde_json::to_vec(&entry).map_err(|err| Error::internal(err.to_string()))?;
            tx.set(&name_key(name), &bytes)?;
            tx.set(&by_id_key(uid), name.as_bytes())?;
            Ok(())
        })
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Option<NameEntry>, Error> {
        let mut found = None;
        self.kv.with_reader(&mut |tx| {
            if let Some(bytes) = tx.get(&name_key(name))? {
                found = Some(
                    serde_json::from_slice(&bytes).map_err(|err| Error::internal(err.to_string()))?,
                );
            }
            Ok(())
        })?;
        Ok(found)
    }

    pub fn lookup_by_uid(&self, uid: Uuid) -> Result<Option<String>, Error> {
        let mut found = None;
        self.kv.with_reader(&mut |tx| {
            if let Some(bytes) = tx.get(&by_id_key(uid))? {
                found = Some(String::from_utf8(bytes).map_err(|err| Error::internal(err.to_string()))?);
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Tries `arg` as a name first, then as a uid; `ErrNotExist` otherwise.
    pub fn resolve(&self, arg: &str) -> Result<Uuid, Error> {
        if let Some(entry) = self.lookup_by_name(arg)? {
            return Ok(entry.uid);
        }
        if let Ok(uid) = Uuid::parse_str(arg) {
            return Ok(uid);
        }
        Err(Error::not_exist(format!("no job or name matches {arg}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_integration::kv::MemoryKv;

    fn naming() -> Naming {
        Naming::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn set_name_then_lookup_round_trips_both_directions() {
        let naming = naming();
        let uid = Uuid::new_v4();
        naming.set_name("grid-1", uid, TraderType::Waller).unwrap();

        assert_eq!(naming.lookup_by_name("grid-1").unwrap().unwrap().uid, uid);
        assert_eq!(naming.lookup_by_uid(uid).unwrap().unwrap(), "grid-1");
    }

    #[test]
    fn set_name_refuses_a_name_already_taken_by_another_uid() {
        let naming = naming();
        naming.set_name("grid-1", Uuid::new_v4(), TraderType::Waller).unwrap();
        let err = naming
            .set_name("grid-1", Uuid::new_v4(), TraderType::Waller)
            .unwrap_err();
        assert!(err.to_string().contains("already taken"));
    }

    #[test]
    fn renaming_a_uid_drops_its_old_name() {
        let naming = naming();
        let uid = Uuid::new_v4();
        naming.set_name("grid-1", uid, TraderType::Waller).unwrap();
        naming.set_name("grid-2", uid, TraderType::Waller).unwrap();

        assert!(naming.lookup_by_name("grid-1").unwrap().is_none());
        assert_eq!(naming.lookup_by_name("grid-2").unwrap().unwrap().uid, uid);
        assert_eq!(naming.lookup_by_uid(uid).unwrap().unwrap(), "grid-2");
    }

    #[test]
    fn resolve_tries_name_before_falling_back_to_a_raw_uid() {
        let naming = naming();
        let named_uid = Uuid::new_v4();
        naming.set_name("grid-1", named_uid, TraderType::Limiter).unwrap();

        assert_eq!(naming.resolve("grid-1").unwrap(), named_uid);

        let raw_uid = Uuid::new_v4();
        assert_eq!(naming.resolve(&raw_uid.to_string()).unwrap(), raw_uid);

        assert!(naming.resolve("no-such-job").is_err());
    }
}
