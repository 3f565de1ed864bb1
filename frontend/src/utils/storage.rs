use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write `{0}`")]
    Write(String),
    #[error("failed to read `{0}`")]
    Read(String),
}

/// Durable key/value storage, the shape of the browser's `localStorage`.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage. Clones share the same entries, which is how tests
/// simulate a page reload: a new controller over the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::{KeyValueStore, StorageError};
    use web_sys::{Storage, Window};

    pub fn window() -> Result<Window, StorageError> {
        web_sys::window().ok_or_else(|| StorageError::Unavailable("No window object".into()))
    }

    pub fn local_storage() -> Result<Storage, StorageError> {
        window()?
            .local_storage()
            .map_err(|_| StorageError::Unavailable("No localStorage".into()))?
            .ok_or_else(|| StorageError::Unavailable("No localStorage".into()))
    }

    impl KeyValueStore for Storage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            Storage::get_item(self, key).map_err(|_| StorageError::Read(key.to_string()))
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            Storage::set_item(self, key, value).map_err(|_| StorageError::Write(key.to_string()))
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            Storage::remove_item(self, key).map_err(|_| StorageError::Write(key.to_string()))
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{local_storage, window};

/// `localStorage` in the browser, in-memory elsewhere or when the browser
/// refuses access (private mode).
pub fn default_store() -> Rc<dyn KeyValueStore> {
    #[cfg(target_arch = "wasm32")]
    {
        match local_storage() {
            Ok(storage) => return Rc::new(storage),
            Err(err) => log::warn!("{}; falling back to memory storage", err),
        }
    }
    Rc::new(MemoryStorage::new())
}
