use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::{debug, info};

use super::track::Track;

/// Tamaño por defecto del historial
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Entrada de la cola: el track y una clave estable que sobrevive a `replace`
#[derive(Debug, Clone)]
struct Entry {
    key: u64,
    track: Arc<Track>,
}

/// Resultado de avanzar desde el track que se estaba reproduciendo
#[derive(Debug, Clone)]
pub(crate) enum Advance {
    /// El actual pasó al historial; este es el nuevo actual
    Next(u64, Arc<Track>),
    /// Otra operación cambió la cabeza (p. ej. `previous`); reproducir esta
    Rotated(u64, Arc<Track>),
    /// No queda nada que reproducir
    Exhausted,
}

#[derive(Debug)]
struct QueueState {
    // tracks[0] es el track actual, el resto son los próximos
    tracks: VecDeque<Entry>,
    // más reciente al final
    history: VecDeque<Entry>,
    max_history: usize,
    next_key: u64,
}

impl QueueState {
    fn entry(&mut self, track: Arc<Track>) -> Entry {
        self.next_key += 1;
        Entry {
            key: self.next_key,
            track,
        }
    }

    fn advance(&mut self) -> Option<&Entry> {
        let current = self.tracks.pop_front()?;
        self.add_to_history(current);
        self.tracks.front()
    }

    fn add_to_history(&mut self, item: Entry) {
        self.history.push_back(item);

        // Mantener solo los últimos N items
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    fn upcoming_range_contains(&self, pos: usize) -> bool {
        pos >= 1 && pos < self.tracks.len()
    }
}

/// Cola de reproducción de un servidor.
///
/// El índice 0 es el track actual y el resto son los próximos. Las
/// posiciones expuestas para edición son 1-based y nunca incluyen el
/// índice 0. Todas las operaciones son atómicas bajo un lock interno y
/// las colecciones devueltas son copias independientes.
#[derive(Debug)]
pub struct Queue {
    inner: RwLock<QueueState>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            inner: RwLock::new(QueueState {
                tracks: VecDeque::new(),
                history: VecDeque::new(),
                max_history: max_history.max(1),
                next_key: 0,
            }),
        }
    }

    /// Agrega tracks al final de la cola
    pub fn add<I>(&self, tracks: I) -> usize
    where
        I: IntoIterator<Item = Arc<Track>>,
    {
        let mut q = self.inner.write();
        let before = q.tracks.len();
        for track in tracks {
            let entry = q.entry(track);
            q.tracks.push_back(entry);
        }
        let added = q.tracks.len() - before;
        debug!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Inserta un track justo después del actual
    pub fn add_next(&self, track: Arc<Track>) {
        let mut q = self.inner.write();
        let entry = q.entry(track);
        if q.tracks.is_empty() {
            q.tracks.push_back(entry);
        } else {
            q.tracks.insert(1, entry);
        }
    }

    /// Obtiene el track actual
    pub fn current(&self) -> Option<Arc<Track>> {
        self.inner.read().tracks.front().map(|e| e.track.clone())
    }

    /// Track actual junto con su clave de entrada
    pub(crate) fn current_entry(&self) -> Option<(u64, Arc<Track>)> {
        self.inner
            .read()
            .tracks
            .front()
            .map(|e| (e.key, e.track.clone()))
    }

    /// Avanza la cola: el actual pasa al historial y devuelve el nuevo actual
    pub fn next(&self) -> Option<Arc<Track>> {
        let mut q = self.inner.write();
        if q.tracks.is_empty() {
            return None;
        }

        let next = q.advance().map(|e| e.track.clone());
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Recupera el último track del historial y lo vuelve a poner al frente
    pub fn previous(&self) -> Option<Arc<Track>> {
        let mut q = self.inner.write();
        let last = q.history.pop_back()?;
        let track = last.track.clone();
        q.tracks.push_front(last);
        debug!("⏮️ Track anterior restaurado: {}", track.title());
        Some(track)
    }

    /// Avanza solo si la cabeza sigue siendo la entrada `playing`.
    ///
    /// Si otra operación ya cambió la cabeza, la nueva cabeza se devuelve
    /// sin mover nada al historial.
    pub(crate) fn advance_from(&self, playing: u64) -> Advance {
        let mut q = self.inner.write();
        let head = q.tracks.front().map(|e| (e.key, e.track.clone()));
        match head {
            None => Advance::Exhausted,
            Some((key, track)) if key != playing => Advance::Rotated(key, track),
            Some(_) => match q.advance() {
                Some(next) => Advance::Next(next.key, next.track.clone()),
                None => Advance::Exhausted,
            },
        }
    }

    /// Devuelve hasta `n` próximos tracks
    pub fn peek(&self, n: usize) -> Vec<Arc<Track>> {
        let q = self.inner.read();
        q.tracks.iter().skip(1).take(n).map(|e| e.track.clone()).collect()
    }

    pub fn upcoming(&self) -> Vec<Arc<Track>> {
        let q = self.inner.read();
        q.tracks.iter().skip(1).map(|e| e.track.clone()).collect()
    }

    pub fn all(&self) -> Vec<Arc<Track>> {
        self.inner.read().tracks.iter().map(|e| e.track.clone()).collect()
    }

    pub fn history(&self) -> Vec<Arc<Track>> {
        self.inner.read().history.iter().map(|e| e.track.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tracks.len()
    }

    pub fn upcoming_len(&self) -> usize {
        self.inner.read().tracks.len().saturating_sub(1)
    }

    /// Elimina el track en la posición `pos` (1-based, nunca el actual)
    pub fn remove(&self, pos: usize) -> Option<Arc<Track>> {
        let mut q = self.inner.write();
        if !q.upcoming_range_contains(pos) {
            return None;
        }

        let removed = q.tracks.remove(pos).map(|e| e.track);
        if let Some(track) = &removed {
            debug!("❌ Track eliminado en posición {}: {}", pos, track.title());
        }
        removed
    }

    /// Mueve un track de `from` a `to` (ambas 1-based)
    pub fn move_track(&self, from: usize, to: usize) -> bool {
        let mut q = self.inner.write();
        if !q.upcoming_range_contains(from) || !q.upcoming_range_contains(to) {
            return false;
        }

        if from == to {
            return true;
        }

        match q.tracks.remove(from) {
            Some(track) => {
                q.tracks.insert(to, track);
                debug!("📍 Track movido de posición {} a {}", from, to);
                true
            }
            None => false,
        }
    }

    /// Mezcla los próximos tracks, el actual no se toca
    pub fn shuffle(&self) {
        let mut q = self.inner.write();
        if q.tracks.len() < 3 {
            return;
        }

        let mut rng = rand::thread_rng();
        let (_, upcoming) = q.tracks.make_contiguous().split_at_mut(1);
        upcoming.shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    /// Limpia los próximos tracks, conserva el actual
    pub fn clear(&self) {
        let mut q = self.inner.write();
        q.tracks.truncate(1);
        info!("🗑️ Cola limpiada");
    }

    /// Limpia todo: actual, próximos e historial
    pub fn clear_all(&self) {
        let mut q = self.inner.write();
        q.tracks.clear();
        q.history.clear();
    }

    /// Sustituye una entrada (por identidad) con una versión enriquecida
    pub fn replace(&self, old: &Arc<Track>, new: Arc<Track>) -> bool {
        let mut q = self.inner.write();
        match q.tracks.iter_mut().find(|e| Arc::ptr_eq(&e.track, old)) {
            Some(slot) => {
                slot.track = new;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tracks.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.inner.read().tracks.len() > 1
    }

    pub fn has_previous(&self) -> bool {
        !self.inner.read().history.is_empty()
    }

    /// Duración conocida del actual más los próximos
    pub fn total_duration(&self) -> Duration {
        self.inner
            .read()
            .tracks
            .iter()
            .filter_map(|e| e.track.duration())
            .sum()
    }
}
