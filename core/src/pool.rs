//! Fixed-size, thread-safe pool of weighted items with probability-weighted selection.
//!
//! The pool is the resampling engine of the particle filter. Its life within one filter tick
//! looks like this:
//!
//! 1. Weights are assigned ([`WeightedPool::assign_weights`]) and normalized
//!    ([`WeightedPool::normalize_weights`]) so that they sum to one.
//! 2. [`WeightedPool::sort_then_cumulate_weights`] sorts the slots by weight and replaces each
//!    weight with the running sum up to and including that slot. The pool is now a cumulative
//!    distribution table and the original per-item weights are gone.
//! 3. [`WeightedPool::pick_instance_according_to_probability`] draws a uniform number in
//!    `[0, 1)` and binary-searches the table for the first slot whose cumulative weight is not
//!    smaller than the draw. Over many draws each slot is returned with a frequency equal to its
//!    normalized weight from step 1.
//!
//! Items, the `sorted` flag and the random number generator sit behind a single
//! [`parking_lot::Mutex`]. Every write clears `sorted` while holding the lock, so a lazy
//! re-sort triggered by a pick can never interleave with a half-finished write.
use crate::error::PoolError;
use crate::particle::Weighted;

use log::trace;
use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::ops::Deref;

struct PoolState<T> {
    items: Vec<T>,
    sorted: bool,
    rng: StdRng,
}

pub struct WeightedPool<T> {
    name: String,
    size: usize,
    state: Mutex<PoolState<T>>,
}

impl<T> Debug for WeightedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("sorted", &self.state.try_lock().map(|state| state.sorted))
            .finish()
    }
}

/// Order two items by the sign of their weight difference.
///
/// NaN weights order before every other weight and equal to each other, so the order stays
/// total. The pool rejects NaN on its own write paths; NaN only gets in through
/// [`WeightedPool::put`] or [`WeightedPool::update`].
pub fn compare_by_weight<T: Weighted>(a: &T, b: &T) -> Ordering {
    let (a, b) = (a.weight(), b.weight());
    match (a.is_nan(), b.is_nan()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    let difference = a - b;
    if difference < 0.0 {
        Ordering::Less
    } else if difference > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

impl<T: Weighted + Default + Clone> WeightedPool<T> {
    /// Create a pool of `capacity` default-valued slots, using an OS-seeded generator.
    ///
    /// A capacity of zero is allowed and produces a permanently empty pool.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_rng(name, capacity, StdRng::from_os_rng())
    }
    /// Create a pool whose selection sequence is reproducible for a given `seed`.
    pub fn with_seed(name: impl Into<String>, capacity: usize, seed: u64) -> Self {
        Self::with_rng(name, capacity, StdRng::seed_from_u64(seed))
    }
    fn with_rng(name: impl Into<String>, capacity: usize, rng: StdRng) -> Self {
        WeightedPool {
            name: name.into(),
            size: capacity,
            state: Mutex::new(PoolState {
                items: vec![T::default(); capacity],
                sorted: false,
                rng,
            }),
        }
    }
}

impl<T: Weighted + Clone> WeightedPool<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
    pub fn is_sorted(&self) -> bool {
        self.state.lock().sorted
    }
    /// Mark the pool as no longer holding a valid cumulative table.
    pub fn unsort(&self) {
        self.state.lock().sorted = false;
    }
    /// Clone of the item in slot `i`.
    ///
    /// # Panics
    /// If `i >= self.size()`.
    pub fn get(&self, i: usize) -> T {
        let state = self.state.lock();
        self.check_index(i);
        state.items[i].clone()
    }
    /// Replace the item in slot `i` and mark the pool unsorted.
    ///
    /// # Panics
    /// If `i >= self.size()`.
    pub fn put(&self, i: usize, value: T) {
        let mut state = self.state.lock();
        self.check_index(i);
        state.sorted = false;
        state.items[i] = value;
    }
    /// Mutate slot `i` in place and mark the pool unsorted.
    ///
    /// # Panics
    /// If `i >= self.size()`.
    pub fn update<R>(&self, i: usize, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state.lock();
        self.check_index(i);
        state.sorted = false;
        f(&mut state.items[i])
    }
    /// Locked, read-only view of all slots. Other pool operations block while it is alive.
    pub fn read(&self) -> PoolView<'_, T> {
        PoolView {
            guard: self.state.lock(),
        }
    }
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }
    pub fn sum_of_weights(&self) -> f64 {
        self.state.lock().items.iter().map(|item| item.weight()).sum()
    }
    /// `1 / sum(w^2)`; only meaningful on normalized weights. Zero when all weights are zero.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self
            .state
            .lock()
            .items
            .iter()
            .map(|item| item.weight() * item.weight())
            .sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
    /// Set each slot's weight to `likelihood(slot)` and return the total.
    ///
    /// Negative, infinite and NaN weights are rejected; slots before the offending one have
    /// already been overwritten when the error is returned.
    pub fn assign_weights(&self, mut likelihood: impl FnMut(&T) -> f64) -> Result<f64, PoolError> {
        let mut state = self.state.lock();
        state.sorted = false;
        let mut sum = 0.0;
        for (index, item) in state.items.iter_mut().enumerate() {
            let weight = likelihood(item);
            if !weight.is_finite() || weight < 0.0 {
                return Err(PoolError::InvalidWeight {
                    name: self.name.clone(),
                    index,
                    weight,
                });
            }
            item.set_weight(weight);
            sum += weight;
        }
        Ok(sum)
    }
    /// Divide every weight by `sum_of_weights`.
    ///
    /// # Errors
    /// [`PoolError::NonPositiveWeightSum`] if the sum is zero, negative or not finite. The pool is
    /// left untouched in that case.
    pub fn normalize_weights(&self, sum_of_weights: f64) -> Result<(), PoolError> {
        if !(sum_of_weights > 0.0 && sum_of_weights.is_finite()) {
            return Err(PoolError::NonPositiveWeightSum {
                name: self.name.clone(),
                sum: sum_of_weights,
            });
        }
        let mut state = self.state.lock();
        state.sorted = false;
        for item in state.items.iter_mut() {
            let weight = item.weight() / sum_of_weights;
            item.set_weight(weight);
        }
        Ok(())
    }
    /// Sort ascending by weight, then replace every weight with the cumulative weight up to
    /// and including its slot. Afterwards the last slot holds the total weight. NaN weights
    /// count as zero.
    pub fn sort_then_cumulate_weights(&self) {
        let mut state = self.state.lock();
        Self::sort_then_cumulate(&mut state);
        trace!("pool '{}': sorted and cumulated {} slots", self.name, self.size);
    }
    /// Index of the first slot whose cumulative weight is `>= r`.
    ///
    /// The pool is expected to hold a cumulative table already. When `r` exceeds every
    /// cumulative weight the last slot is returned.
    ///
    /// # Errors
    /// [`PoolError::Empty`] for a zero-length pool.
    pub fn binary_search_for_number(&self, r: f64) -> Result<usize, PoolError> {
        let state = self.state.lock();
        self.search(&state.items, r)
    }
    /// Draw one slot index with probability proportional to its normalized weight, building
    /// the cumulative table first if the pool is not sorted.
    pub fn pick_index_according_to_probability(&self) -> Result<usize, PoolError> {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            return Err(self.empty_error());
        }
        if !state.sorted {
            Self::sort_then_cumulate(&mut state);
        }
        let r: f64 = state.rng.random();
        self.search(&state.items, r)
    }
    /// Like [`Self::pick_index_according_to_probability`] but returns a clone of the item.
    ///
    /// # Example
    /// ```rust
    /// use mcl::particle::{Particle, Weighted};
    /// use mcl::pool::WeightedPool;
    ///
    /// let pool: WeightedPool<Particle> = WeightedPool::with_seed("demo", 2, 7);
    /// pool.update(0, |p| p.set_weight(0.0));
    /// pool.update(1, |p| p.set_weight(1.0));
    /// let picked = pool.pick_instance_according_to_probability().unwrap();
    /// assert_eq!(picked.weight(), 1.0);
    /// ```
    pub fn pick_instance_according_to_probability(&self) -> Result<T, PoolError> {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            return Err(self.empty_error());
        }
        if !state.sorted {
            Self::sort_then_cumulate(&mut state);
        }
        let r: f64 = state.rng.random();
        let index = self.search(&state.items, r)?;
        Ok(state.items[index].clone())
    }

    fn sort_then_cumulate(state: &mut PoolState<T>) {
        state.items.sort_by(compare_by_weight);
        let mut cumulated = 0.0;
        for item in state.items.iter_mut() {
            // NaN slots sorted to the front and contribute nothing
            let weight = item.weight();
            if !weight.is_nan() {
                cumulated += weight;
            }
            item.set_weight(cumulated);
        }
        state.sorted = true;
    }
    fn search(&self, items: &[T], r: f64) -> Result<usize, PoolError> {
        if items.is_empty() {
            return Err(self.empty_error());
        }
        if items[0].weight() >= r {
            return Ok(0);
        }
        // Invariant: items[min] < r, and the answer lies in (min, max].
        let mut min = 0;
        let mut max = items.len() - 1;
        while min + 1 < max {
            let center = min + (max - min) / 2;
            if items[center].weight() >= r {
                max = center;
            } else {
                min = center;
            }
        }
        Ok(max)
    }
    fn check_index(&self, i: usize) {
        assert!(
            i < self.size,
            "index {i} out of bounds for pool '{}' of size {}",
            self.name,
            self.size
        );
    }
    fn empty_error(&self) -> PoolError {
        PoolError::Empty {
            name: self.name.clone(),
        }
    }
}

/// Read-only view over a locked pool.
pub struct PoolView<'a, T> {
    guard: MutexGuard<'a, PoolState<T>>,
}
impl<T> Deref for PoolView<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.guard.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Arc;
    use std::thread;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct SimpleWeighted {
        weight: f64,
    }
    impl SimpleWeighted {
        fn new(weight: f64) -> Self {
            SimpleWeighted { weight }
        }
    }
    impl Weighted for SimpleWeighted {
        fn weight(&self) -> f64 {
            self.weight
        }
        fn set_weight(&mut self, weight: f64) {
            self.weight = weight;
        }
    }

    fn pool_with_weights(weights: &[f64]) -> WeightedPool<SimpleWeighted> {
        let pool = WeightedPool::with_seed("test", weights.len(), 1234);
        for (i, &w) in weights.iter().enumerate() {
            pool.put(i, SimpleWeighted::new(w));
        }
        pool
    }

    fn cumulated_reference_pool() -> WeightedPool<SimpleWeighted> {
        let pool = pool_with_weights(&[0.1, 0.1, 0.1, 0.7]);
        let sum = pool.sum_of_weights();
        pool.normalize_weights(sum).unwrap();
        pool.sort_then_cumulate_weights();
        pool
    }

    #[test]
    fn get_and_put() {
        for size in [0, 1, 10] {
            let pool = pool_with_weights(&(0..size).map(|i| i as f64).collect::<Vec<_>>());
            assert_eq!(pool.size(), size);
            for i in 0..size {
                assert_approx_eq!(pool.get(i).weight(), i as f64, 1e-10);
            }
            for i in 0..size {
                pool.put(i, SimpleWeighted::new((size - i) as f64));
            }
            for i in 0..size {
                assert_approx_eq!(pool.get(i).weight(), (size - i) as f64, 1e-10);
            }
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn get_out_of_bounds_panics() {
        let pool: WeightedPool<SimpleWeighted> = WeightedPool::new("small", 3);
        pool.get(3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn put_on_empty_pool_panics() {
        let pool: WeightedPool<SimpleWeighted> = WeightedPool::new("empty", 0);
        pool.put(0, SimpleWeighted::new(1.0));
    }

    #[test]
    fn new_pool_is_preallocated_with_defaults() {
        let pool: WeightedPool<SimpleWeighted> = WeightedPool::new("defaults", 5);
        assert_eq!(pool.name(), "defaults");
        assert_eq!(pool.snapshot(), vec![SimpleWeighted::default(); 5]);
        assert!(!pool.is_sorted());
    }

    #[test]
    fn normalization_sums_to_one() {
        let pool = pool_with_weights(&[3.0, 0.5, 12.25, 0.0, 7.0, 1e-6]);
        let sum = pool.sum_of_weights();
        pool.normalize_weights(sum).unwrap();
        assert_approx_eq!(pool.sum_of_weights(), 1.0, 1e-9);
    }

    #[test]
    fn normalization_rejects_non_positive_sum() {
        let pool = pool_with_weights(&[0.0, 0.0]);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = pool.normalize_weights(bad).unwrap_err();
            assert!(matches!(err, PoolError::NonPositiveWeightSum { .. }));
        }
        assert_eq!(pool.snapshot(), vec![SimpleWeighted::new(0.0); 2]);
    }

    #[test]
    fn cumulation_is_monotonic_and_ends_at_total() {
        let weights = [0.4, 0.05, 0.3, 0.0, 0.25, 0.9, 0.1];
        let total: f64 = weights.iter().sum();
        let pool = pool_with_weights(&weights);
        pool.sort_then_cumulate_weights();
        assert!(pool.is_sorted());
        let cumulated = pool.snapshot();
        for pair in cumulated.windows(2) {
            assert!(pair[0].weight() <= pair[1].weight());
        }
        assert_approx_eq!(cumulated.last().unwrap().weight(), total, 1e-12);
    }

    #[test]
    fn binary_search_reference_cases() {
        let pool = cumulated_reference_pool();
        let expected = [0.1, 0.2, 0.3, 1.0];
        for (item, e) in pool.snapshot().iter().zip(expected) {
            assert_approx_eq!(item.weight(), e, 1e-12);
        }
        assert_eq!(pool.binary_search_for_number(0.15).unwrap(), 1);
        assert_eq!(pool.binary_search_for_number(0.19).unwrap(), 1);
        assert_eq!(pool.binary_search_for_number(0.21).unwrap(), 2);
        assert_eq!(pool.binary_search_for_number(0.66).unwrap(), 3);
        assert_eq!(pool.binary_search_for_number(1.0).unwrap(), 3);
    }

    #[test]
    fn binary_search_edges() {
        let pool = cumulated_reference_pool();
        assert_eq!(pool.binary_search_for_number(0.0).unwrap(), 0);
        assert_eq!(pool.binary_search_for_number(0.05).unwrap(), 0);
        assert_eq!(pool.binary_search_for_number(2.0).unwrap(), 3);

        let single = pool_with_weights(&[1.0]);
        single.sort_then_cumulate_weights();
        assert_eq!(single.binary_search_for_number(0.5).unwrap(), 0);
        assert_eq!(single.binary_search_for_number(1.5).unwrap(), 0);
    }

    #[test]
    fn binary_search_prefers_lowest_index_on_ties() {
        // Cumulative table of the weights [0.25, 0.25, 0.0, 0.0, 0.5]: a run of equal entries.
        let table = pool_with_weights(&[0.25, 0.5, 0.5, 0.5, 1.0]);
        assert_eq!(table.binary_search_for_number(0.3).unwrap(), 1);
        assert_eq!(table.binary_search_for_number(0.5).unwrap(), 1);
        assert_eq!(table.binary_search_for_number(0.75).unwrap(), 4);
    }

    #[test]
    fn sampling_frequencies_converge_to_weights() {
        let weights = [0.1, 0.1, 0.1, 0.7];
        let pool = cumulated_reference_pool();
        // Sorting is stable, so the slot order matches the original weight order.
        let draws = 100_000 * weights.len();
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            counts[pool.pick_index_according_to_probability().unwrap()] += 1;
        }
        for (count, weight) in counts.iter().zip(weights) {
            let frequency = *count as f64 / draws as f64;
            assert!(
                (frequency - weight).abs() < 0.01,
                "frequency {frequency} too far from weight {weight}"
            );
        }
    }

    #[test]
    fn pick_sorts_lazily_and_only_once() {
        let pool = pool_with_weights(&[0.0, 0.0, 1.0]);
        assert!(!pool.is_sorted());
        let picked = pool.pick_instance_according_to_probability().unwrap();
        assert!(pool.is_sorted());
        assert_approx_eq!(picked.weight(), 1.0, 1e-12);
        let before = pool.snapshot();
        pool.pick_instance_according_to_probability().unwrap();
        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn writes_clear_sorted_flag() {
        let pool = pool_with_weights(&[0.5, 0.5]);
        pool.sort_then_cumulate_weights();
        pool.put(0, SimpleWeighted::new(0.2));
        assert!(!pool.is_sorted());

        pool.sort_then_cumulate_weights();
        pool.update(1, |item| item.set_weight(3.0));
        assert!(!pool.is_sorted());

        pool.sort_then_cumulate_weights();
        pool.unsort();
        assert!(!pool.is_sorted());
        // unsort leaves data alone
        assert_approx_eq!(pool.get(1).weight(), 3.2, 1e-12);
    }

    #[test]
    fn assign_weights_sums_and_validates() {
        let pool = pool_with_weights(&[1.0, 2.0, 3.0]);
        let sum = pool.assign_weights(|item| item.weight() * 2.0).unwrap();
        assert_approx_eq!(sum, 12.0, 1e-12);
        assert_approx_eq!(pool.get(2).weight(), 6.0, 1e-12);

        let err = pool.assign_weights(|_| -1.0).unwrap_err();
        assert_eq!(
            err,
            PoolError::InvalidWeight {
                name: "test".to_string(),
                index: 0,
                weight: -1.0
            }
        );
        assert!(pool.assign_weights(|_| f64::NAN).is_err());
        let err = pool
            .assign_weights(|item| if item.weight() > 3.0 { f64::INFINITY } else { 1.0 })
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidWeight { index: 1, weight, .. } if weight == f64::INFINITY
        ));
    }

    #[test]
    fn nan_weights_sort_first_and_are_never_picked() {
        let pool: WeightedPool<SimpleWeighted> = WeightedPool::with_seed("nan", 64, 99);
        for i in 0..64 {
            let weight = if i % 3 == 0 { f64::NAN } else { 1.0 };
            pool.put(i, SimpleWeighted::new(weight));
        }
        pool.sort_then_cumulate_weights();
        let table = pool.snapshot();
        // 22 NaN slots cumulate to zero, the 42 others count up to 42
        assert!(table[..22].iter().all(|item| item.weight == 0.0));
        assert_approx_eq!(table[22].weight, 1.0, 1e-12);
        assert_approx_eq!(table[63].weight, 42.0, 1e-12);

        for i in (0..64).step_by(5) {
            pool.update(i, |item| item.set_weight(f64::NAN));
        }
        for _ in 0..1_000 {
            let index = pool.pick_index_according_to_probability().unwrap();
            assert!(index < 64);
        }
        assert!(pool.is_sorted());
    }

    #[test]
    fn comparison_is_total_with_nan() {
        let nan = SimpleWeighted::new(f64::NAN);
        let one = SimpleWeighted::new(1.0);
        let inf = SimpleWeighted::new(f64::INFINITY);
        assert_eq!(compare_by_weight(&nan, &nan), Ordering::Equal);
        assert_eq!(compare_by_weight(&nan, &one), Ordering::Less);
        assert_eq!(compare_by_weight(&inf, &nan), Ordering::Greater);
        assert_eq!(compare_by_weight(&inf, &inf), Ordering::Equal);
        assert_eq!(compare_by_weight(&one, &inf), Ordering::Less);
    }

    #[test]
    fn effective_sample_size_of_uniform_weights() {
        let pool = pool_with_weights(&[0.25; 4]);
        assert_approx_eq!(pool.effective_sample_size(), 4.0, 1e-12);
        let degenerate = pool_with_weights(&[0.0, 1.0, 0.0]);
        assert_approx_eq!(degenerate.effective_sample_size(), 1.0, 1e-12);
    }

    #[test]
    fn zero_length_pool_is_guarded() {
        let pool: WeightedPool<SimpleWeighted> = WeightedPool::new("empty", 0);
        assert!(pool.is_empty());
        assert_eq!(pool.sum_of_weights(), 0.0);
        assert!(pool.normalize_weights(pool.sum_of_weights()).is_err());
        assert!(pool.normalize_weights(1.0).is_ok());
        pool.sort_then_cumulate_weights();
        assert!(matches!(
            pool.pick_instance_according_to_probability(),
            Err(PoolError::Empty { .. })
        ));
        assert!(matches!(
            pool.pick_index_according_to_probability(),
            Err(PoolError::Empty { .. })
        ));
        assert!(matches!(
            pool.binary_search_for_number(0.5),
            Err(PoolError::Empty { .. })
        ));
        assert_eq!(pool.effective_sample_size(), 0.0);
        assert!(pool.read().is_empty());
    }

    #[test]
    fn read_view_exposes_items() {
        let pool = pool_with_weights(&[1.0, 2.0]);
        let view = pool.read();
        assert_eq!(view.len(), 2);
        assert_approx_eq!(view[1].weight(), 2.0, 1e-12);
    }

    #[test]
    fn concurrent_picks_and_writes_never_see_torn_tables() {
        let pool = Arc::new(pool_with_weights(&[1.0; 64]));
        let mut handles = Vec::new();
        for t in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for k in 0..2_000 {
                    if t % 2 == 0 {
                        let index = pool.pick_index_according_to_probability().unwrap();
                        assert!(index < pool.size());
                    } else {
                        pool.put(k % 64, SimpleWeighted::new((k % 7) as f64 + 1.0));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.size(), 64);
    }
}
