//! Variation and selection operators on integer chromosomes.

use rand::Rng;

use super::optimizer::Individual;

/// Picks `count` parents by repeated tournaments of `tournament_size` aspirants.
///
/// Aspirants are drawn with replacement. Returns indices into `population`.
///
/// # Panics
///
/// Panics if `population` is empty.
pub fn tournament_select<R: Rng + ?Sized>(
    rng: &mut R,
    population: &[Individual],
    count: usize,
    tournament_size: usize,
) -> Vec<usize> {
    assert!(!population.is_empty(), "cannot select from empty population");
    (0..count)
        .map(|_| {
            let mut best = rng.random_range(0..population.len());
            for _ in 1..tournament_size.max(1) {
                let challenger = rng.random_range(0..population.len());
                if population[challenger].beats(&population[best]) {
                    best = challenger;
                }
            }
            best
        })
        .collect()
}

/// Swaps the gene segment between two random cut points.
///
/// Both cut points lie strictly inside the chromosome, so at least one gene
/// is always exchanged. Returns `true` if either chromosome changed.
pub fn two_point_crossover<R: Rng + ?Sized>(rng: &mut R, a: &mut [u8], b: &mut [u8]) -> bool {
    let size = a.len().min(b.len());
    if size < 2 {
        return false;
    }
    let mut lo = rng.random_range(1..=size);
    let mut hi = rng.random_range(1..size);
    if hi >= lo {
        hi += 1;
    } else {
        std::mem::swap(&mut lo, &mut hi);
    }
    let mut changed = false;
    for i in lo..hi {
        if a[i] != b[i] {
            std::mem::swap(&mut a[i], &mut b[i]);
            changed = true;
        }
    }
    changed
}

/// Resamples each gene uniformly in `[0, grid_max]` with probability `gene_probability`.
///
/// Returns `true` if any gene changed.
pub fn uniform_int_mutation<R: Rng + ?Sized>(
    rng: &mut R,
    genes: &mut [u8],
    grid_max: u8,
    gene_probability: f64,
) -> bool {
    let mut changed = false;
    for gene in genes.iter_mut() {
        if rng.random_bool(gene_probability) {
            let v = rng.random_range(0..=grid_max);
            changed |= v != *gene;
            *gene = v;
        }
    }
    changed
}
