//! Drop state bookkeeping and guaranteed recovery.
//!
//! A [`DropRegistry`] remembers every interface a test has put into a drop
//! state. [`with_drop_recovery`] scopes one registry to one test body and
//! restores full output on every registered interface once the body is done,
//! whether it returned `Ok`, returned `Err` or panicked.

use crate::client::MuxSimulatorClient;
use crate::types::{DirectionSet, MuxError};
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Pending {
    interfaces: Mutex<BTreeSet<String>>,
}

impl Pending {
    fn insert(&self, interface: &str) {
        self.interfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(interface.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.interfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn take(&self) -> BTreeSet<String> {
        std::mem::take(
            &mut *self
                .interfaces
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        let leaked = self.take();
        if !leaked.is_empty() {
            error!(
                interfaces = ?leaked,
                "Drop registry released with unrecovered ports; simulator drop state leaked"
            );
        }
    }
}

/// Interfaces with a drop applied and not yet recovered.
///
/// Clones share the same set. Meant for one test at a time.
#[derive(Clone)]
pub struct DropRegistry {
    client: MuxSimulatorClient,
    pending: Arc<Pending>,
}

impl DropRegistry {
    pub fn new(client: MuxSimulatorClient) -> Self {
        Self {
            client,
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn client(&self) -> &MuxSimulatorClient {
        &self.client
    }

    /// Block `directions` on `interface` and register it for recovery.
    ///
    /// The interface is registered once its port index resolves and before
    /// the request goes out, so a drop that the simulator applied but failed
    /// to acknowledge is still undone. An unknown interface is never
    /// registered.
    pub async fn set_drop(
        &self,
        interface: &str,
        directions: &DirectionSet,
    ) -> Result<(), MuxError> {
        self.client.urls().port_index(interface).await?;
        self.pending.insert(interface);
        self.client.set_drop(interface, directions).await
    }

    /// Cut both ToRs off from `interface`, as if the simulator server had
    /// gone away for that cable.
    pub async fn simulate_server_down(&self, interface: &str) -> Result<(), MuxError> {
        self.set_drop(interface, &DirectionSet::tors()).await
    }

    /// Registered interfaces, sorted.
    pub fn pending(&self) -> Vec<String> {
        self.pending.snapshot()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Restore `upper_tor`, `lower_tor` and `nic` output on every registered
    /// interface and empty the registry.
    ///
    /// Every interface is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub async fn recover(&self) -> Result<(), MuxError> {
        let interfaces = self.pending.take();
        if interfaces.is_empty() {
            return Ok(());
        }
        info!(interfaces = ?interfaces, "Recovering all directions on dropped ports");

        let mut first_error = None;
        for interface in interfaces {
            match self.client.recover_all_directions(&interface).await {
                Ok(()) => debug!(interface = %interface, "Recovered all directions"),
                Err(e) => {
                    error!(interface = %interface, error = %e, "Failed to recover port");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run `test` with a fresh [`DropRegistry`] and recover every port it
/// dropped afterwards.
///
/// A panic in `test` is resumed after recovery. A recovery failure is
/// returned only when `test` itself succeeded; otherwise it is logged and the
/// test's own error wins.
pub async fn with_drop_recovery<F, Fut, T>(
    client: &MuxSimulatorClient,
    test: F,
) -> Result<T, MuxError>
where
    F: FnOnce(DropRegistry) -> Fut,
    Fut: Future<Output = Result<T, MuxError>>,
{
    let registry = DropRegistry::new(client.clone());
    let outcome = AssertUnwindSafe(test(registry.clone()))
        .catch_unwind()
        .await;

    let recovered = registry.recover().await;

    match outcome {
        Ok(Ok(value)) => recovered.map(|()| value),
        Ok(Err(e)) => {
            if let Err(recovery_error) = recovered {
                warn!(error = %recovery_error, "Recovery failed after test error");
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(recovery_error) = recovered {
                warn!(error = %recovery_error, "Recovery failed after test panic");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
