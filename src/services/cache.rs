// src/services/cache.rs

//! Shared cache of question sets keyed by (subject, categories, difficulty, tags).
//!
//! Each key owns an async mutex: lookups on different keys never contend,
//! while lookups on the same key queue behind whichever one is fetching, so the
//! repository sees at most one query per missing key per burst. The map's shard
//! locks are never held across an `.await`.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::AppError,
    models::question::{Difficulty, QuestionSnapshot},
    repository::{QuestionQuery, QuestionRepository},
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Eviction starts once the footprint exceeds this.
    pub max_memory_bytes: usize,
    /// Eviction stops once the footprint is at or below this.
    pub low_water_bytes: usize,
    /// Minimum number of questions requested from the repository on a miss.
    pub fetch_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            low_water_bytes: 48 * 1024 * 1024,
            fetch_batch: 50,
        }
    }
}

/// Normalized lookup key. Category and tag sets are trimmed, deduplicated and
/// sorted, so equivalent requests hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    subject_id: i64,
    categories: Vec<String>,
    difficulty: Difficulty,
    tags: Vec<String>,
}

fn normalize<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl CacheKey {
    pub fn new<C, T>(subject_id: i64, categories: C, difficulty: Difficulty, tags: T) -> Self
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            subject_id,
            categories: normalize(categories),
            difficulty,
            tags: normalize(tags),
        }
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    fn to_query(&self, limit: usize) -> QuestionQuery {
        QuestionQuery {
            subject_id: self.subject_id,
            categories: self.categories.clone(),
            difficulty: self.difficulty,
            tags: self.tags.clone(),
            limit,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject={} difficulty={} categories=[{}] tags=[{}]",
            self.subject_id,
            self.difficulty,
            self.categories.join(","),
            self.tags.join(",")
        )
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    questions: Vec<QuestionSnapshot>,
    hit_count: u64,
    miss_count: u64,
    last_accessed_at: DateTime<Utc>,
    /// Logical clock value of the last access; orders LRU eviction.
    last_access_tick: u64,
    size_bytes: usize,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            questions: Vec::new(),
            hit_count: 0,
            miss_count: 0,
            last_accessed_at: Utc::now(),
            last_access_tick: 0,
            size_bytes: 0,
        }
    }

    fn touch(&mut self, tick: u64) {
        self.last_access_tick = tick;
        self.last_accessed_at = Utc::now();
    }

    /// Adds questions not already present. Returns the bytes added.
    fn merge(&mut self, fetched: Vec<QuestionSnapshot>) -> usize {
        let mut added = 0;
        for question in fetched {
            if self.questions.iter().any(|q| q.id == question.id) {
                continue;
            }
            added += question.estimated_size();
            self.questions.push(question);
        }
        self.size_bytes += added;
        added
    }

    /// Uniform sample without replacement.
    fn sample(&self, count: usize) -> Vec<QuestionSnapshot> {
        let mut rng = rand::rng();
        rand::seq::index::sample(&mut rng, self.questions.len(), count)
            .into_iter()
            .map(|i| self.questions[i].clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub question_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub size_bytes: usize,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub memory_usage_bytes: usize,
    pub entry_count: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub questions: Vec<QuestionSnapshot>,
    /// `true` when served without touching the repository.
    pub hit: bool,
}

type Slot = Arc<Mutex<CacheEntry>>;

pub struct QuestionCache {
    repository: Arc<dyn QuestionRepository>,
    config: CacheConfig,
    entries: DashMap<CacheKey, Slot>,
    memory_bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    clock: AtomicU64,
}

impl QuestionCache {
    pub fn new(repository: Arc<dyn QuestionRepository>, config: CacheConfig) -> Self {
        Self {
            repository,
            config,
            entries: DashMap::new(),
            memory_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            clock: AtomicU64::new(1),
        }
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        if let Some(slot) = self.entries.get(key) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new())));
        Arc::clone(slot.value())
    }

    /// Draws `count` distinct questions for `key`, fetching from the
    /// repository when the entry holds fewer than that.
    pub async fn get(&self, key: &CacheKey, count: usize) -> Result<CacheLookup, AppError> {
        let lookup = {
            let slot = self.slot(key);
            let mut entry = slot.lock().await;
            entry.touch(self.clock.fetch_add(1, Ordering::Relaxed));

            if entry.questions.len() >= count {
                entry.hit_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, count, "question cache hit");
                Ok(CacheLookup {
                    questions: entry.sample(count),
                    hit: true,
                })
            } else {
                entry.miss_count += 1;
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    %key,
                    count,
                    cached = entry.questions.len(),
                    "question cache miss, fetching"
                );

                let limit = count.max(self.config.fetch_batch);
                let fetched = self.repository.find(&key.to_query(limit)).await?;
                let added = entry.merge(fetched);
                self.memory_bytes.fetch_add(added, Ordering::Relaxed);

                if entry.questions.len() < count {
                    Err(AppError::InsufficientQuestions {
                        key: key.to_string(),
                        requested: count,
                        available: entry.questions.len(),
                    })
                } else {
                    Ok(CacheLookup {
                        questions: entry.sample(count),
                        hit: false,
                    })
                }
            }
        };

        self.evict_if_needed();
        lookup
    }

    /// Removes `key` unless a lookup currently holds it. Returns freed bytes.
    fn remove_idle(&self, key: &CacheKey) -> Option<usize> {
        let mut freed = 0;
        self.entries
            .remove_if(key, |_, slot| {
                // The map's own handle is the only one: nobody is mid-draw.
                if Arc::strong_count(slot) > 1 {
                    return false;
                }
                match slot.try_lock() {
                    Ok(entry) => {
                        freed = entry.size_bytes;
                        true
                    }
                    Err(_) => false,
                }
            })
            .map(|_| {
                self.memory_bytes.fetch_sub(freed, Ordering::Relaxed);
                freed
            })
    }

    fn evict_if_needed(&self) {
        if self.memory_usage() <= self.config.max_memory_bytes {
            return;
        }

        let mut candidates: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .filter_map(|item| {
                item.value()
                    .try_lock()
                    .ok()
                    .map(|entry| (item.key().clone(), entry.last_access_tick))
            })
            .collect();
        candidates.sort_by_key(|(_, tick)| *tick);

        for (key, _) in candidates {
            if self.memory_usage() <= self.config.low_water_bytes {
                break;
            }
            if let Some(freed) = self.remove_idle(&key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(%key, freed, "evicted question cache entry");
            }
        }
    }

    /// Drops every idle entry for a subject, e.g. after its questions changed.
    pub fn invalidate_subject(&self, subject_id: i64) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|item| item.key().subject_id == subject_id)
            .map(|item| item.key().clone())
            .collect();

        let removed = keys
            .iter()
            .filter(|key| self.remove_idle(key).is_some())
            .count();
        debug!(subject_id, removed, "invalidated question cache entries");
        removed
    }

    pub fn clear(&self) {
        let keys: Vec<CacheKey> = self.entries.iter().map(|item| item.key().clone()).collect();
        for key in keys {
            self.remove_idle(&key);
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_bytes.load(Ordering::Relaxed)
    }

    pub async fn entry_stats(&self, key: &CacheKey) -> Option<EntryStats> {
        let slot = self.entries.get(key).map(|s| Arc::clone(s.value()))?;
        let entry = slot.lock().await;
        Some(EntryStats {
            question_count: entry.questions.len(),
            hit_count: entry.hit_count,
            miss_count: entry.miss_count,
            size_bytes: entry.size_bytes,
            last_accessed_at: entry.last_accessed_at,
        })
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        CacheStats {
            hit_rate,
            memory_usage_bytes: self.memory_usage(),
            entry_count: self.entries.len(),
            total_hits: hits,
            total_misses: misses,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use super::*;
    use crate::{models::question::fixtures::question, repository::memory::InMemoryQuestionRepository};

    fn bank(n: i64, difficulty: Difficulty) -> Vec<QuestionSnapshot> {
        (1..=n).map(|id| question(id, difficulty, "math")).collect()
    }

    fn small_batches() -> CacheConfig {
        CacheConfig {
            fetch_batch: 0,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn equivalent_keys_are_equal() {
        let a = CacheKey::new(1, ["b", "a", "a"], Difficulty::Easy, [" x", "y"]);
        let b = CacheKey::new(1, vec!["a".to_string(), "b".to_string()], Difficulty::Easy, ["y", "x", ""]);
        assert_eq!(a, b);
        assert_eq!((a.subject_id(), a.difficulty()), (1, Difficulty::Easy));
        assert_ne!(a, CacheKey::new(1, ["a", "b"], Difficulty::Hard, ["x", "y"]));
    }

    #[tokio::test]
    async fn miss_then_hit_raises_hit_rate() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(10, Difficulty::Easy)));
        let cache = QuestionCache::new(repo.clone(), CacheConfig::default());
        let key = CacheKey::new(1, ["math"], Difficulty::Easy, Vec::<String>::new());

        let first = cache.get(&key, 5).await.unwrap();
        assert!(!first.hit);
        assert_eq!(cache.stats().hit_rate, 0.0);

        let second = cache.get(&key, 5).await.unwrap();
        assert!(second.hit);
        assert_eq!(cache.stats().hit_rate, 0.5);
        assert_eq!(repo.fetch_count(), 1);

        let stats = cache.entry_stats(&key).await.unwrap();
        assert_eq!((stats.hit_count, stats.miss_count), (1, 1));
    }

    #[tokio::test]
    async fn sample_has_no_duplicates() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(20, Difficulty::Medium)));
        let cache = QuestionCache::new(repo, CacheConfig::default());
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Medium, Vec::<String>::new());

        for _ in 0..5 {
            let lookup = cache.get(&key, 12).await.unwrap();
            let ids: HashSet<i64> = lookup.questions.iter().map(|q| q.id).collect();
            assert_eq!(ids.len(), 12);
        }
    }

    #[tokio::test]
    async fn partial_miss_fetches_remainder() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(10, Difficulty::Easy)));
        let cache = QuestionCache::new(repo.clone(), small_batches());
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Easy, Vec::<String>::new());

        assert!(!cache.get(&key, 3).await.unwrap().hit);
        let lookup = cache.get(&key, 8).await.unwrap();
        assert!(!lookup.hit);
        assert_eq!(lookup.questions.len(), 8);
        assert_eq!(repo.fetch_count(), 2);
        assert!(cache.get(&key, 8).await.unwrap().hit);
    }

    #[tokio::test]
    async fn short_supply_is_an_error() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(3, Difficulty::Hard)));
        let cache = QuestionCache::new(repo, CacheConfig::default());
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Hard, Vec::<String>::new());

        let err = cache.get(&key, 4).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientQuestions {
                requested: 4,
                available: 3,
                ..
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_fetch_once() {
        let repo = Arc::new(
            InMemoryQuestionRepository::new(bank(10, Difficulty::Easy))
                .with_latency(Duration::from_millis(50)),
        );
        let cache = Arc::new(QuestionCache::new(repo.clone(), CacheConfig::default()));
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Easy, Vec::<String>::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                tokio::spawn(async move { cache.get(&key, 4).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().questions.len(), 4);
        }

        assert_eq!(repo.fetch_count(), 1);
        let stats = cache.stats();
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.total_hits, 7);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_down_to_low_water() {
        let mut questions = bank(4, Difficulty::Easy);
        questions.extend((5..=8).map(|id| question(id, Difficulty::Medium, "math")));
        questions.extend((9..=12).map(|id| question(id, Difficulty::Hard, "math")));
        let per_entry: usize = questions[..4].iter().map(|q| q.estimated_size()).sum();

        let repo = Arc::new(InMemoryQuestionRepository::new(questions));
        let cache = QuestionCache::new(
            repo,
            CacheConfig {
                max_memory_bytes: per_entry * 2 + per_entry / 2,
                low_water_bytes: per_entry * 2 + per_entry / 4,
                fetch_batch: 0,
            },
        );
        let none = Vec::<String>::new;
        let easy = CacheKey::new(1, none(), Difficulty::Easy, none());
        let medium = CacheKey::new(1, none(), Difficulty::Medium, none());
        let hard = CacheKey::new(1, none(), Difficulty::Hard, none());

        cache.get(&easy, 4).await.unwrap();
        cache.get(&medium, 4).await.unwrap();
        cache.get(&easy, 4).await.unwrap();
        cache.get(&hard, 4).await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 2);
        assert!(stats.memory_usage_bytes <= per_entry * 2 + per_entry / 4);
        assert!(cache.entry_stats(&medium).await.is_none());
        assert!(cache.entry_stats(&easy).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_subject_drops_entries() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(5, Difficulty::Easy)));
        let cache = QuestionCache::new(repo, CacheConfig::default());
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Easy, Vec::<String>::new());

        cache.get(&key, 2).await.unwrap();
        assert_eq!(cache.invalidate_subject(1), 1);
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    fn bytes(questions: &[QuestionSnapshot]) -> usize {
        questions.iter().map(|q| q.estimated_size()).sum()
    }

    #[tokio::test]
    async fn eviction_skips_entry_held_by_a_lookup() {
        let easy_bank = bank(4, Difficulty::Easy);
        let medium_bank: Vec<_> = (5..=8).map(|id| question(id, Difficulty::Medium, "math")).collect();
        let hard_bank: Vec<_> = (9..=12).map(|id| question(id, Difficulty::Hard, "math")).collect();
        let (e, m2, h) = (bytes(&easy_bank), bytes(&medium_bank[..2]), bytes(&hard_bank));

        let mut questions = easy_bank;
        questions.extend(medium_bank);
        questions.extend(hard_bank);
        let repo = Arc::new(InMemoryQuestionRepository::new(questions));
        let cache = QuestionCache::new(
            repo,
            CacheConfig {
                max_memory_bytes: e + h,
                low_water_bytes: m2 + h,
                fetch_batch: 0,
            },
        );
        let none = Vec::<String>::new;
        let easy = CacheKey::new(1, none(), Difficulty::Easy, none());
        let medium = CacheKey::new(1, none(), Difficulty::Medium, none());
        let hard = CacheKey::new(1, none(), Difficulty::Hard, none());

        // medium is the least recently used entry
        cache.get(&medium, 2).await.unwrap();
        cache.get(&easy, 4).await.unwrap();

        let slot = cache.slot(&medium);
        let held = slot.lock().await;
        assert!(cache.remove_idle(&medium).is_none());

        cache.get(&hard, 4).await.unwrap();
        drop(held);
        drop(slot);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert!(cache.entry_stats(&easy).await.is_none());
        let medium_stats = cache.entry_stats(&medium).await.unwrap();
        let hard_stats = cache.entry_stats(&hard).await.unwrap();
        assert_eq!(medium_stats.size_bytes, m2);
        assert_eq!(hard_stats.size_bytes, h);
        assert_eq!(cache.memory_usage(), m2 + h);

        assert_eq!(cache.remove_idle(&medium), Some(m2));
        assert_eq!(cache.memory_usage(), h);
    }

    #[tokio::test]
    async fn clear_keeps_entry_with_fetch_in_flight() {
        let repo = Arc::new(
            InMemoryQuestionRepository::new(bank(8, Difficulty::Easy))
                .with_latency(Duration::from_millis(50)),
        );
        let cache = Arc::new(QuestionCache::new(repo.clone(), small_batches()));
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Easy, Vec::<String>::new());
        let other = CacheKey::new(1, ["math"], Difficulty::Easy, Vec::<String>::new());

        cache.get(&key, 2).await.unwrap();
        cache.get(&other, 2).await.unwrap();

        let pending = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move { cache.get(&key, 6).await })
        };
        while repo.fetch_count() < 3 {
            tokio::task::yield_now().await;
        }

        cache.clear();
        assert_eq!(cache.stats().entry_count, 1);
        assert!(cache.entry_stats(&other).await.is_none());

        assert_eq!(pending.await.unwrap().unwrap().questions.len(), 6);
        let stats = cache.entry_stats(&key).await.unwrap();
        assert_eq!(stats.question_count, 6);
        assert_eq!(stats.size_bytes, bytes(&bank(6, Difficulty::Easy)));
        assert_eq!(cache.memory_usage(), stats.size_bytes);
    }

    #[tokio::test]
    async fn invalidated_subject_sees_new_questions() {
        let repo = Arc::new(InMemoryQuestionRepository::new(bank(3, Difficulty::Easy)));
        let cache = QuestionCache::new(repo.clone(), CacheConfig::default());
        let key = CacheKey::new(1, Vec::<String>::new(), Difficulty::Easy, Vec::<String>::new());

        cache.get(&key, 3).await.unwrap();
        repo.insert(question(4, Difficulty::Easy, "math")).await;
        assert!(cache.get(&key, 4).await.is_ok());

        repo.remove(1).await;
        assert_eq!(cache.invalidate_subject(key.subject_id()), 1);
        let err = cache.get(&key, 4).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientQuestions { available: 3, .. }));
    }
}
