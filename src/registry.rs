// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the name registry shared by gripper hosts and hand drivers on one machine.
//!
//! A hand driver publishes its address under `gripper_<name>_f1`. A gripper host claims
//! `gripper_<name>` for as long as it runs, so no second host can be started for the same hand.
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

use crate::exception::{GripperException, GripperResult};

/// Key claimed by the host serving the gripper `name`.
pub fn host_param_key(name: &str) -> String {
    format!("gripper_{}", name)
}

/// Key under which the hand driver of the gripper `name` publishes its address.
pub fn hand_param_key(name: &str) -> String {
    format!("gripper_{}_f1", name)
}

/// Process-wide key value store.
#[cfg_attr(test, automock)]
pub trait NameRegistry {
    fn has_param(&self, key: &str) -> GripperResult<bool>;
    fn get_param(&self, key: &str) -> GripperResult<Option<String>>;
    /// Stores `value` under `key` if nobody holds the key yet.
    /// # Return
    /// A guard that removes the entry again when dropped, None if the key is already taken.
    fn claim(&self, key: &str, value: &str) -> GripperResult<Option<RegistryClaim>>;
}

/// Stores every key as a file in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    /// Opens the registry in `root`, creating the directory if needed.
    pub fn open<P: Into<PathBuf>>(root: P) -> GripperResult<DirectoryRegistry> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| registry_error(&root, e))?;
        Ok(DirectoryRegistry { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> GripperResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(GripperException::ServiceException {
                message: format!("registry: invalid key {:?}", key),
            });
        }
        Ok(self.root.join(key))
    }
}

impl NameRegistry for DirectoryRegistry {
    fn has_param(&self, key: &str) -> GripperResult<bool> {
        Ok(self.path_of(key)?.is_file())
    }

    fn get_param(&self, key: &str) -> GripperResult<Option<String>> {
        let path = self.path_of(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(registry_error(&path, e)),
        }
    }

    fn claim(&self, key: &str, value: &str) -> GripperResult<Option<RegistryClaim>> {
        let path = self.path_of(key)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(registry_error(&path, e)),
        };
        let claim = RegistryClaim {
            key: key.to_string(),
            path: Some(path),
        };
        file.write_all(value.as_bytes())
            .map_err(|e| GripperException::ServiceException {
                message: format!("registry: could not write {}: {}", key, e),
            })?;
        log::debug!("registry: claimed {}", key);
        Ok(Some(claim))
    }
}

/// Holds a registry entry. The entry is removed on drop.
#[derive(Debug)]
pub struct RegistryClaim {
    key: String,
    path: Option<PathBuf>,
}

impl RegistryClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Removes the entry now and reports failures instead of only logging them.
    pub fn release(mut self) -> GripperResult<()> {
        self.remove()
    }

    fn remove(&mut self) -> GripperResult<()> {
        match self.path.take() {
            Some(path) => match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("registry: released {}", self.key);
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(registry_error(&path, e)),
            },
            None => Ok(()),
        }
    }
}

impl Drop for RegistryClaim {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            log::warn!("{}", e);
        }
    }
}

/// Checks that a host may be started for the gripper `name`.
/// # Return
/// The address published by the hand driver.
/// # Errors
/// * [`NameConflict`](`crate::exception::GripperException::NameConflict`) if a host for `name`
/// is already running.
/// * [`ServiceNotReady`](`crate::exception::GripperException::ServiceNotReady`) if no hand
/// driver has published its address for `name`.
pub fn validate_gripper_name<R: NameRegistry + ?Sized>(
    registry: &R,
    name: &str,
) -> GripperResult<String> {
    if registry.has_param(&host_param_key(name))? {
        return Err(GripperException::NameConflict {
            name: name.to_string(),
        });
    }
    registry
        .get_param(&hand_param_key(name))?
        .ok_or_else(|| GripperException::ServiceNotReady {
            name: name.to_string(),
            message: format!("no hand driver registered under {}", hand_param_key(name)),
        })
}

/// Claims the host key of the gripper `name` after [`validate_gripper_name`] succeeded.
/// # Errors
/// * [`NameConflict`](`crate::exception::GripperException::NameConflict`) if another host
/// claimed the name in the meantime.
pub fn claim_gripper_name<R: NameRegistry + ?Sized>(
    registry: &R,
    name: &str,
    node_name: &str,
) -> GripperResult<RegistryClaim> {
    registry
        .claim(&host_param_key(name), node_name)?
        .ok_or_else(|| GripperException::NameConflict {
            name: name.to_string(),
        })
}

fn registry_error(path: &Path, error: std::io::Error) -> GripperException {
    GripperException::ServiceException {
        message: format!("registry: {}: {}", path.display(), error),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mockall::predicate::eq;

    use crate::exception::GripperException;
    use crate::registry::{
        claim_gripper_name, validate_gripper_name, DirectoryRegistry, MockNameRegistry,
        NameRegistry,
    };

    static NEXT_DIRECTORY: AtomicUsize = AtomicUsize::new(0);

    struct TempRegistry {
        registry: DirectoryRegistry,
        root: PathBuf,
    }

    impl TempRegistry {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!(
                "gripper_registry_test_{}_{}",
                std::process::id(),
                NEXT_DIRECTORY.fetch_add(1, Ordering::SeqCst)
            ));
            let registry = DirectoryRegistry::open(&root).unwrap();
            TempRegistry { registry, root }
        }
    }

    impl Drop for TempRegistry {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn claims_are_exclusive_and_released_on_drop() {
        let temp = TempRegistry::new();
        let registry = &temp.registry;
        assert!(!registry.has_param("gripper_left").unwrap());
        {
            let claim = registry
                .claim("gripper_left", "GripperServer.left")
                .unwrap()
                .expect("key should be free");
            assert_eq!(claim.key(), "gripper_left");
            assert!(registry.has_param("gripper_left").unwrap());
            assert_eq!(
                registry.get_param("gripper_left").unwrap().as_deref(),
                Some("GripperServer.left")
            );
            assert!(registry.claim("gripper_left", "other").unwrap().is_none());
        }
        assert!(!registry.has_param("gripper_left").unwrap());
        assert_eq!(registry.get_param("gripper_left").unwrap(), None);
    }

    #[test]
    fn release_removes_entry() {
        let temp = TempRegistry::new();
        let claim = temp
            .registry
            .claim("gripper_right_f1", "127.0.0.1:1337")
            .unwrap()
            .unwrap();
        claim.release().unwrap();
        assert!(!temp.registry.has_param("gripper_right_f1").unwrap());
    }

    #[test]
    fn keys_cannot_leave_the_registry_directory() {
        let temp = TempRegistry::new();
        for key in ["", "../gripper_left", "a/b", ".hidden"].iter() {
            match temp.registry.has_param(key) {
                Err(GripperException::ServiceException { .. }) => {}
                other => panic!("expected ServiceException for {:?} but found {:?}", key, other),
            }
        }
    }

    #[test]
    fn validate_returns_hand_address() {
        let temp = TempRegistry::new();
        let _driver = temp
            .registry
            .claim("gripper_left_f1", "127.0.0.1:1337\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            validate_gripper_name(&temp.registry, "left").unwrap(),
            "127.0.0.1:1337"
        );
        let host = claim_gripper_name(&temp.registry, "left", "GripperServer.left").unwrap();
        match validate_gripper_name(&temp.registry, "left") {
            Err(GripperException::NameConflict { name }) => assert_eq!(name, "left"),
            other => panic!("expected NameConflict but found {:?}", other),
        }
        match claim_gripper_name(&temp.registry, "left", "GripperServer.left") {
            Err(GripperException::NameConflict { .. }) => {}
            other => panic!("expected NameConflict but found {:?}", other),
        }
        drop(host);
        assert!(validate_gripper_name(&temp.registry, "left").is_ok());
    }

    #[test]
    fn validate_reports_missing_driver() {
        let mut registry = MockNameRegistry::new();
        registry
            .expect_has_param()
            .with(eq("gripper_right"))
            .times(1)
            .returning(|_| Ok(false));
        registry
            .expect_get_param()
            .with(eq("gripper_right_f1"))
            .times(1)
            .returning(|_| Ok(None));
        match validate_gripper_name(&registry, "right") {
            Err(GripperException::ServiceNotReady { name, .. }) => assert_eq!(name, "right"),
            other => panic!("expected ServiceNotReady but found {:?}", other),
        }
    }

    #[test]
    fn name_conflict_is_checked_first() {
        let mut registry = MockNameRegistry::new();
        registry.expect_has_param().returning(|_| Ok(true));
        registry.expect_get_param().never();
        match validate_gripper_name(&registry, "left") {
            Err(GripperException::NameConflict { .. }) => {}
            other => panic!("expected NameConflict but found {:?}", other),
        }
    }
}
