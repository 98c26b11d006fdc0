use crate::error::{AppError, AppResult};
use crate::models::User;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Notified synchronously after a user leaves the registry.
pub trait UserDeletedListener: Send + Sync {
    fn user_deleted(&self, user: &Arc<User>);
}

/// In-memory directory of registered users, keyed by name.
#[derive(Default)]
pub struct UserRegistry {
    users: RwLock<HashMap<String, Arc<User>>>,
    listeners: RwLock<Vec<Weak<dyn UserDeletedListener>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str) -> AppResult<Arc<User>> {
        let user = Arc::new(User::new(name)?);
        let mut users = self.users.write();
        if users.contains_key(user.name()) {
            return Err(AppError::AuthDuplicateName);
        }
        users.insert(user.name().to_string(), user.clone());
        tracing::info!(user = user.name(), total = users.len(), "user registered");
        Ok(user)
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<User>> {
        self.users.read().get(name).cloned().ok_or(AppError::AuthNo)
    }

    pub fn has(&self, name: &str) -> bool {
        self.users.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes `name` and tells every live listener about it.
    pub fn delete(&self, name: &str) -> AppResult<Arc<User>> {
        let user = self.users.write().remove(name).ok_or(AppError::AuthNo)?;
        tracing::info!(user = user.name(), "user deleted");

        let listeners: Vec<Arc<dyn UserDeletedListener>> = {
            let mut guard = self.listeners.write();
            guard.retain(|l| l.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.user_deleted(&user);
        }
        Ok(user)
    }

    pub fn add_listener(&self, listener: Weak<dyn UserDeletedListener>) {
        self.listeners.write().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl UserDeletedListener for Recorder {
        fn user_deleted(&self, user: &Arc<User>) {
            self.seen.lock().push(user.name().to_string());
        }
    }

    #[test]
    fn test_add_get_has() {
        let registry = UserRegistry::new();
        let alice = registry.add("alice").unwrap();
        assert!(registry.has("alice"));
        assert!(Arc::ptr_eq(&alice, &registry.get("alice").unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let registry = UserRegistry::new();
        registry.add("alice").unwrap();
        assert_eq!(registry.add(" alice ").unwrap_err(), AppError::AuthDuplicateName);
        assert_eq!(registry.add(" ").unwrap_err(), AppError::AuthEmptyName);
    }

    #[test]
    fn test_unknown_user_is_auth_no() {
        let registry = UserRegistry::new();
        assert_eq!(registry.get("ghost").unwrap_err(), AppError::AuthNo);
        assert_eq!(registry.delete("ghost").unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_delete_notifies_live_listeners() {
        let registry = UserRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn UserDeletedListener> = Arc::downgrade(&recorder) as _;
        registry.add_listener(weak);

        let dropped = Arc::new(Recorder::default());
        registry.add_listener(Arc::downgrade(&dropped) as Weak<dyn UserDeletedListener>);
        drop(dropped);

        registry.add("alice").unwrap();
        registry.delete("alice").unwrap();
        assert!(!registry.has("alice"));
        assert_eq!(*recorder.seen.lock(), vec!["alice".to_string()]);
        assert_eq!(registry.listeners.read().len(), 1);
    }
}
