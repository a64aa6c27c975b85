use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tracing::debug;

/// Motivo por el que se armó el temporizador; decide cómo se revalida al disparar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerReason {
    /// Cola vacía y nada sonando
    Idle,
    /// El bot quedó solo en su canal de voz
    Alone,
}

#[derive(Debug)]
struct Pending {
    generation: u64,
    reason: TimerReason,
    handle: JoinHandle<()>,
}

/// Temporizador de inactividad de una guild: como mucho uno pendiente.
///
/// Cada `arm` incrementa la generación. El callback recibe la generación con
/// la que fue armado y debe llamar a [`InactivityTimer::claim`] bajo el carril
/// de la guild; si otro `arm` o un `cancel` lo reemplazó, `claim` devuelve
/// `None` y el disparo no hace nada.
#[derive(Debug, Default)]
pub struct InactivityTimer {
    generation: u64,
    pending: Option<Pending>,
}

impl InactivityTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programa `on_fire` tras `duration`, cancelando cualquier timer anterior.
    pub fn arm<F, Fut>(&mut self, duration: Duration, reason: TimerReason, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        self.generation += 1;
        let generation = self.generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire(generation).await;
        });

        debug!(
            "⏲️ Timer de inactividad armado ({:?}, generación {}, {}s)",
            reason,
            generation,
            duration.as_secs()
        );
        self.pending = Some(Pending {
            generation,
            reason,
            handle,
        });
        generation
    }

    /// Cancela el timer pendiente. Devuelve `true` si había uno.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                debug!("⏲️ Timer de inactividad cancelado (generación {})", pending.generation);
                true
            }
            None => false,
        }
    }

    /// Reclama el disparo de `generation`. Solo el timer vigente puede reclamarse;
    /// no aborta la tarea porque quien llama es la propia tarea del timer.
    pub fn claim(&mut self, generation: u64) -> Option<TimerReason> {
        match &self.pending {
            Some(pending) if pending.generation == generation => {
                self.pending.take().map(|pending| pending.reason)
            }
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
