use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::{NoteminderError, Result};
use crate::storage::Persisted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; asking is allowed.
    #[default]
    Default,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Granted => write!(f, "granted"),
            Permission::Denied => write!(f, "denied"),
            Permission::Default => write!(f, "default"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = NoteminderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "granted" | "grant" => Ok(Permission::Granted),
            "denied" | "deny" => Ok(Permission::Denied),
            "default" | "prompt" => Ok(Permission::Default),
            _ => Err(NoteminderError::InvalidPermission(s.to_string())),
        }
    }
}

/// Asks the user for notification permission.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn request(&self) -> Result<Permission>;
}

/// Answers every prompt with the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub Permission);

#[async_trait]
impl PermissionPrompt for FixedPrompt {
    async fn request(&self) -> Result<Permission> {
        Ok(self.0)
    }
}

/// Asks on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl PermissionPrompt for TerminalPrompt {
    async fn request(&self) -> Result<Permission> {
        if !atty::is(atty::Stream::Stdin) {
            return Err(NoteminderError::InvalidPermission(
                "no terminal to ask for notification permission".to_string(),
            ));
        }

        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"Allow note reminders to show notifications? [y/N] ").await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(match line.trim().to_lowercase().as_str() {
            "y" | "yes" => Permission::Granted,
            _ => Permission::Denied,
        })
    }
}

/// Tracks the notification permission and decides whether reminders may be shown.
///
/// A gate built with [`PermissionGate::shared`] keeps the decision in storage,
/// so every context on the same store sees a grant or denial made by any of them.
pub struct PermissionGate {
    state: RwLock<Permission>,
    shared: Option<Persisted<Permission>>,
    supported: bool,
    prompt: Arc<dyn PermissionPrompt>,
    prompting: Mutex<()>,
}

impl PermissionGate {
    /// A gate whose decision lives only in this process.
    pub fn new(initial: Permission, prompt: Arc<dyn PermissionPrompt>) -> Self {
        Self {
            state: RwLock::new(initial),
            shared: None,
            supported: true,
            prompt,
            prompting: Mutex::new(()),
        }
    }

    /// A gate reading its decision from `stored` on every check; `fallback`
    /// applies while nothing has been decided there.
    pub fn shared(
        stored: Persisted<Permission>,
        fallback: Permission,
        prompt: Arc<dyn PermissionPrompt>,
    ) -> Self {
        Self {
            shared: Some(stored),
            ..Self::new(fallback, prompt)
        }
    }

    /// A host without notification support; permission always reads as denied.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Permission::Denied, Arc::new(FixedPrompt(Permission::Denied)))
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn current_permission(&self) -> Permission {
        if !self.supported {
            return Permission::Denied;
        }
        let local = *self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &self.shared {
            Some(stored) => match stored.read(local) {
                Permission::Default => local,
                decided => decided,
            },
            None => local,
        }
    }

    /// Wait until a decision made here has reached storage.
    pub async fn flush(&self) {
        if let Some(stored) = &self.shared {
            stored.flush().await;
        }
    }

    /// True when permission is granted, asking first only if it is still undecided.
    ///
    /// An explicit denial is final; it is never asked again.
    pub async fn ensure_granted(&self) -> bool {
        match self.current_permission() {
            Permission::Granted => return true,
            Permission::Denied => return false,
            Permission::Default => {}
        }

        let _guard = self.prompting.lock().await;
        // Another caller may have prompted while we waited.
        match self.current_permission() {
            Permission::Granted => return true,
            Permission::Denied => return false,
            Permission::Default => {}
        }

        let decided = match self.prompt.request().await {
            Ok(permission) => permission,
            Err(e) => {
                tracing::error!(error = %e, "permission request failed");
                Permission::Denied
            }
        };
        tracing::info!(permission = %decided, "notification permission decided");

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = decided;
        if let Some(stored) = &self.shared {
            if decided != Permission::Default {
                stored.write(&decided);
            }
        }
        decided == Permission::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPrompt {
        answer: Permission,
        calls: AtomicUsize,
    }

    impl CountingPrompt {
        fn new(answer: Permission) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionPrompt for CountingPrompt {
        async fn request(&self) -> Result<Permission> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    struct BrokenPrompt;

    #[async_trait]
    impl PermissionPrompt for BrokenPrompt {
        async fn request(&self) -> Result<Permission> {
            Err(NoteminderError::InvalidPermission("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_granted_does_not_prompt() {
        let prompt = CountingPrompt::new(Permission::Denied);
        let gate = PermissionGate::new(Permission::Granted, prompt.clone());
        assert!(gate.ensure_granted().await);
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn test_denied_never_reprompts() {
        let prompt = CountingPrompt::new(Permission::Granted);
        let gate = PermissionGate::new(Permission::Denied, prompt.clone());
        assert!(!gate.ensure_granted().await);
        assert!(!gate.ensure_granted().await);
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn test_default_prompts_once() {
        let prompt = CountingPrompt::new(Permission::Granted);
        let gate = PermissionGate::new(Permission::Default, prompt.clone());
        assert!(gate.ensure_granted().await);
        assert!(gate.ensure_granted().await);
        assert_eq!(prompt.calls(), 1);
        assert_eq!(gate.current_permission(), Permission::Granted);
    }

    #[tokio::test]
    async fn test_denial_from_prompt_is_final() {
        let prompt = CountingPrompt::new(Permission::Denied);
        let gate = PermissionGate::new(Permission::Default, prompt.clone());
        assert!(!gate.ensure_granted().await);
        assert!(!gate.ensure_granted().await);
        assert_eq!(prompt.calls(), 1);
        assert_eq!(gate.current_permission(), Permission::Denied);
    }

    #[tokio::test]
    async fn test_failed_prompt_counts_as_denied() {
        let gate = PermissionGate::new(Permission::Default, Arc::new(BrokenPrompt));
        assert!(!gate.ensure_granted().await);
        assert_eq!(gate.current_permission(), Permission::Denied);
    }

    #[tokio::test]
    async fn test_unsupported_reads_denied() {
        let gate = PermissionGate::unsupported();
        assert!(!gate.is_supported());
        assert_eq!(gate.current_permission(), Permission::Denied);
        assert!(!gate.ensure_granted().await);
    }

    #[tokio::test]
    async fn test_shared_gate_sees_decision_from_other_context() {
        use crate::entity::PERMISSION_KEY;
        use crate::storage::MemoryStore;

        let tab_a = Arc::new(MemoryStore::new());
        let tab_b = Arc::new(tab_a.new_context());
        let prompt = CountingPrompt::new(Permission::Denied);
        let gate = PermissionGate::shared(
            Persisted::new(tab_a, PERMISSION_KEY),
            Permission::Default,
            prompt.clone(),
        );
        assert_eq!(gate.current_permission(), Permission::Default);

        let other = Persisted::new(tab_b, PERMISSION_KEY);
        other.write(&Permission::Granted);
        other.flush().await;

        assert_eq!(gate.current_permission(), Permission::Granted);
        assert!(gate.ensure_granted().await);
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn test_shared_gate_stores_its_decision() {
        use crate::entity::PERMISSION_KEY;
        use crate::storage::{KeyValueStore, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let gate = PermissionGate::shared(
            Persisted::new(store.clone(), PERMISSION_KEY),
            Permission::Default,
            CountingPrompt::new(Permission::Denied),
        );
        assert!(!gate.ensure_granted().await);
        gate.flush().await;
        assert_eq!(
            store.get_item(PERMISSION_KEY).unwrap(),
            Some("\"denied\"".to_string())
        );
    }

    #[test]
    fn test_permission_from_str() {
        assert_eq!("Granted".parse::<Permission>().unwrap(), Permission::Granted);
        assert_eq!("prompt".parse::<Permission>().unwrap(), Permission::Default);
        assert!("maybe".parse::<Permission>().is_err());
    }
}
