use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Una pista ya resuelta, inmutable una vez encolada
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub uri: String,
    pub title: String,
    pub duration_ms: Option<u64>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

/// Cola de reproducción por guild.
///
/// La cabeza de la cola es la pista que se considera en reproducción;
/// `pop_head` la descarta y promueve la siguiente. La sincronización no
/// vive aquí: el dueño de la sesión serializa todo acceso.
#[derive(Debug)]
pub struct PlaybackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl PlaybackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una pista al final de la cola
    pub fn enqueue(&mut self, track: Track) -> Result<()> {
        if self.items.len() >= self.max_size {
            anyhow::bail!("la cola está llena (máximo {} canciones)", self.max_size);
        }

        info!("➕ Agregado a la cola: {}", track.title);
        self.items.push_back(track);

        Ok(())
    }

    /// Agrega múltiples pistas (playlist) preservando su orden.
    /// Devuelve cuántas entraron; el resto se descarta si no hay espacio.
    pub fn enqueue_many(&mut self, tracks: Vec<Track>) -> usize {
        let available = self.max_size.saturating_sub(self.items.len());
        let to_add = tracks.len().min(available);

        for track in tracks.into_iter().take(to_add) {
            self.items.push_back(track);
        }

        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Descarta la cabeza y promueve la siguiente pista
    pub fn pop_head(&mut self) -> Option<Track> {
        let head = self.items.pop_front();
        if let Some(ref track) = head {
            debug!("⏭️ Cabeza descartada: {}", track.title);
        }
        head
    }

    /// La pista que se considera en reproducción
    pub fn peek_head(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Mezcla todas las pistas menos la cabeza.
    /// No hace nada con menos de 2 pistas después de la cabeza.
    pub fn shuffle_remainder(&mut self) {
        if self.items.len() < 3 {
            return;
        }

        let slice = self.items.make_contiguous();
        let mut rng = rand::thread_rng();
        slice[1..].shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} pistas)", self.items.len() - 1);
    }

    /// Limpia la cola
    pub fn clear(&mut self) {
        self.items.clear();
        debug!("🗑️ Cola limpiada");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copia del contenido actual, para reportes de `/queue`
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Track {
        Track {
            uri: format!("https://tracks.example/{title}"),
            title: title.to_string(),
            duration_ms: Some(180_000),
            requested_by: UserId::new(42),
            added_at: Utc::now(),
        }
    }

    #[test]
    fn enqueue_preserves_fifo_order() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(track("a")).unwrap();
        queue.enqueue(track("b")).unwrap();
        queue.enqueue(track("c")).unwrap();

        assert_eq!(queue.peek_head().unwrap().title, "a");
        assert_eq!(queue.pop_head().unwrap().title, "a");
        assert_eq!(queue.pop_head().unwrap().title, "b");
        assert_eq!(queue.pop_head().unwrap().title, "c");
        assert!(queue.pop_head().is_none());
    }

    #[test]
    fn enqueue_fails_when_full() {
        let mut queue = PlaybackQueue::new(2);
        queue.enqueue(track("a")).unwrap();
        queue.enqueue(track("b")).unwrap();

        assert!(queue.enqueue(track("c")).is_err());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn enqueue_many_truncates_to_capacity() {
        let mut queue = PlaybackQueue::new(3);
        queue.enqueue(track("a")).unwrap();

        let added = queue.enqueue_many(vec![track("b"), track("c"), track("d")]);

        assert_eq!(added, 2);
        let titles: Vec<_> = queue.snapshot().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn shuffle_keeps_head_and_contents() {
        let mut queue = PlaybackQueue::new(50);
        for i in 0..20 {
            queue.enqueue(track(&format!("t{i}"))).unwrap();
        }

        let before: Vec<_> = queue.snapshot().into_iter().map(|t| t.title).collect();
        queue.shuffle_remainder();
        let after: Vec<_> = queue.snapshot().into_iter().map(|t| t.title).collect();

        assert_eq!(after[0], "t0");
        let mut sorted_before = before.clone();
        let mut sorted_after = after.clone();
        sorted_before.sort();
        sorted_after.sort();
        assert_eq!(sorted_before, sorted_after);
    }

    #[test]
    fn shuffle_is_noop_with_short_remainder() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(track("head")).unwrap();
        queue.enqueue(track("only")).unwrap();

        queue.shuffle_remainder();

        let titles: Vec<_> = queue.snapshot().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["head", "only"]);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(track("a")).unwrap();
        queue.enqueue(track("b")).unwrap();

        queue.clear();

        assert!(queue.is_empty());
        assert!(queue.peek_head().is_none());
    }
}
