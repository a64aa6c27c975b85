use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, str::FromStr};
use tracing::{debug, info};

use super::{error::PlayerError, track::Track};

/// Política de repetición, consultada solo al avanzar tras el fin de una pista.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl FromStr for LoopMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "queue" => Ok(Self::Queue),
            other => anyhow::bail!("Modo de repetición desconocido: {}", other),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Off => f.write_str("desactivado"),
            LoopMode::Track => f.write_str("canción"),
            LoopMode::Queue => f.write_str("cola"),
        }
    }
}

/// Cola FIFO de una guild.
///
/// No tiene sincronización propia: vive dentro de la `Session`, que ya está
/// protegida por el carril de su guild. Los índices públicos son 1-based.
#[derive(Debug)]
pub struct GuildQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final y devuelve su posición (1-based)
    pub fn enqueue(&mut self, track: Track) -> Result<usize, PlayerError> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        Ok(self.items.len())
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn dequeue(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        if next.is_none() {
            debug!("📭 Cola vacía, no hay siguiente track");
        }
        next
    }

    /// Reinserta al frente (repetir canción). No respeta el límite: el track
    /// acaba de salir de la cola.
    pub fn insert_front(&mut self, track: Track) {
        self.items.push_front(track);
    }

    /// Reinserta al final (repetir cola), igual que `insert_front` sin límite
    pub fn requeue_back(&mut self, track: Track) {
        self.items.push_back(track);
    }

    /// Elimina un track por posición 1-based, validando contra la longitud actual
    pub fn remove_at(&mut self, index: i64) -> Result<Track, PlayerError> {
        let len = self.items.len();
        let out_of_range = PlayerError::IndexOutOfRange { index, len };

        let position = usize::try_from(index).map_err(|_| out_of_range.clone())?;
        if position == 0 || position > len {
            return Err(out_of_range);
        }

        let removed = self.items.remove(position - 1).ok_or(out_of_range)?;
        debug!("❌ Track eliminado en posición {}", position);
        Ok(removed)
    }

    pub fn peek(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Limpia la cola y devuelve cuántos tracks se eliminaron
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    /// Copia ordenada de la cola en este instante
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    /// Mezcla la cola y devuelve cuántos tracks se mezclaron
    pub fn shuffle(&mut self) -> usize {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
        self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
