//! Genetic search over integer chromosomes.
//!
//! The generational loop follows the classic simple evolutionary algorithm:
//! evaluate the initial population, then for each generation select a full
//! offspring population by tournament, recombine consecutive pairs, mutate,
//! and re-evaluate only the offspring whose genes changed. A single-entry
//! hall of fame keeps the cheapest valid chromosome ever seen.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::OptimizerConfig;
use crate::error::Result;

use super::operators::{tournament_select, two_point_crossover, uniform_int_mutation};
use super::policy::Chromosome;

/// Scores a chromosome; lower is better.
pub trait CostFunction: Sync {
    /// # Errors
    ///
    /// Any error marks the candidate as invalid.
    fn cost(&self, genes: &[u8]) -> Result<f64>;
}

impl<F> CostFunction for F
where
    F: Fn(&[u8]) -> Result<f64> + Sync,
{
    fn cost(&self, genes: &[u8]) -> Result<f64> {
        self(genes)
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fitness {
    /// Finite cost.
    Valid(f64),
    /// Evaluation failed or produced a non-finite cost; loses every comparison.
    Invalid,
}

impl Fitness {
    pub fn cost(&self) -> Option<f64> {
        match self {
            Self::Valid(c) => Some(*c),
            Self::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

impl From<Result<f64>> for Fitness {
    fn from(outcome: Result<f64>) -> Self {
        match outcome {
            Ok(c) if c.is_finite() => Self::Valid(c),
            Ok(c) => {
                debug!(cost = c, "non-finite cost scored as invalid");
                Self::Invalid
            }
            Err(e) => {
                debug!(error = %e, "candidate evaluation failed");
                Self::Invalid
            }
        }
    }
}

/// A chromosome with its fitness, `None` until evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub genes: Chromosome,
    pub fitness: Option<Fitness>,
}

impl Individual {
    pub fn new(genes: Chromosome) -> Self {
        Self {
            genes,
            fitness: None,
        }
    }

    /// Returns `true` if `self` is strictly cheaper than `other`.
    ///
    /// Unevaluated and invalid individuals never win.
    pub fn beats(&self, other: &Individual) -> bool {
        match (
            self.fitness.and_then(|f| f.cost()),
            other.fitness.and_then(|f| f.cost()),
        ) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Statistics over one generation's population.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    /// 0 for the initial population.
    pub generation: usize,
    /// Evaluations performed for this generation.
    pub evaluations: usize,
    /// Individuals holding an invalid fitness.
    pub invalid: usize,
    /// Cost statistics over valid individuals; `None` when none are valid.
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
}

impl GenerationStats {
    fn collect(generation: usize, evaluations: usize, population: &[Individual]) -> Self {
        let costs: Vec<f64> = population
            .iter()
            .filter_map(|ind| ind.fitness.and_then(|f| f.cost()))
            .collect();
        let invalid = population.len() - costs.len();
        let (min, mean, max) = if costs.is_empty() {
            (None, None, None)
        } else {
            let min = costs.iter().copied().fold(f64::INFINITY, f64::min);
            let max = costs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = costs.iter().sum::<f64>() / costs.len() as f64;
            (Some(min), Some(mean), Some(max))
        };
        Self {
            generation,
            evaluations,
            invalid,
            min,
            mean,
            max,
        }
    }
}

/// Cheapest valid chromosome found.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPolicy {
    pub chromosome: Chromosome,
    pub cost: f64,
}

/// Result of one search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationResult {
    /// `None` when no candidate evaluated successfully.
    pub best: Option<BestPolicy>,
    pub generations: Vec<GenerationStats>,
    /// Total evaluations across all generations.
    pub evaluations: usize,
    /// The deadline expired before the last generation.
    pub timed_out: bool,
}

/// Searches for a cheap chromosome of a given length.
pub trait PolicySearch {
    /// Highest gene value produced by this search.
    fn grid_max(&self) -> u8;

    /// Runs one search, stopping early once `deadline` has passed.
    fn search<F: CostFunction>(
        &mut self,
        cost: &F,
        genome_len: usize,
        deadline: Option<Instant>,
    ) -> OptimizationResult;
}

/// Genetic algorithm parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GaSettings {
    pub generations: usize,
    pub population_size: usize,
    pub crossover_probability: f64,
    pub mutation_probability: f64,
    pub gene_mutation_probability: f64,
    pub tournament_size: usize,
    pub grid_max: u8,
    pub seed: u64,
}

impl From<&OptimizerConfig> for GaSettings {
    fn from(cfg: &OptimizerConfig) -> Self {
        Self {
            generations: cfg.generations,
            population_size: cfg.population_size,
            crossover_probability: cfg.crossover_probability,
            mutation_probability: cfg.mutation_probability,
            gene_mutation_probability: cfg.gene_mutation_probability,
            tournament_size: cfg.tournament_size,
            grid_max: cfg.grid_max,
            seed: cfg.seed,
        }
    }
}

impl Default for GaSettings {
    fn default() -> Self {
        Self::from(&OptimizerConfig::default())
    }
}

/// Seeded genetic optimiser; one random stream spans every search it runs.
#[derive(Debug, Clone)]
pub struct GeneticOptimizer {
    settings: GaSettings,
    rng: StdRng,
}

impl GeneticOptimizer {
    pub fn new(settings: GaSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self { settings, rng }
    }

    pub fn settings(&self) -> &GaSettings {
        &self.settings
    }

    fn random_individual(&mut self, genome_len: usize) -> Individual {
        let grid_max = self.settings.grid_max;
        Individual::new(
            (0..genome_len)
                .map(|_| self.rng.random_range(0..=grid_max))
                .collect(),
        )
    }

    /// Selection followed by pairwise crossover and mutation.
    fn offspring(&mut self, population: &[Individual]) -> Vec<Individual> {
        let s = &self.settings;
        let picks = tournament_select(
            &mut self.rng,
            population,
            population.len(),
            s.tournament_size,
        );
        let mut offspring: Vec<Individual> =
            picks.into_iter().map(|i| population[i].clone()).collect();

        for i in (1..offspring.len()).step_by(2) {
            if self.rng.random_bool(s.crossover_probability) {
                let (left, right) = offspring.split_at_mut(i);
                let a = &mut left[i - 1];
                let b = &mut right[0];
                if two_point_crossover(&mut self.rng, &mut a.genes, &mut b.genes) {
                    a.fitness = None;
                    b.fitness = None;
                }
            }
        }
        for ind in &mut offspring {
            if self.rng.random_bool(s.mutation_probability)
                && uniform_int_mutation(
                    &mut self.rng,
                    &mut ind.genes,
                    s.grid_max,
                    s.gene_mutation_probability,
                )
            {
                ind.fitness = None;
            }
        }
        offspring
    }
}

/// Evaluates every individual without a fitness in parallel; returns how many were evaluated.
fn evaluate<F: CostFunction>(population: &mut [Individual], cost: &F) -> usize {
    let pending = population.iter().filter(|i| i.fitness.is_none()).count();
    population
        .par_iter_mut()
        .filter(|ind| ind.fitness.is_none())
        .for_each(|ind| ind.fitness = Some(Fitness::from(cost.cost(&ind.genes))));
    pending
}

fn update_hall_of_fame(best: &mut Option<BestPolicy>, population: &[Individual]) {
    for ind in population {
        let Some(cost) = ind.fitness.and_then(|f| f.cost()) else {
            continue;
        };
        if best.as_ref().is_none_or(|b| cost < b.cost) {
            *best = Some(BestPolicy {
                chromosome: ind.genes.clone(),
                cost,
            });
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

impl PolicySearch for GeneticOptimizer {
    fn grid_max(&self) -> u8 {
        self.settings.grid_max
    }

    fn search<F: CostFunction>(
        &mut self,
        cost: &F,
        genome_len: usize,
        deadline: Option<Instant>,
    ) -> OptimizationResult {
        let mut result = OptimizationResult::default();
        if expired(deadline) {
            warn!("deadline passed before the initial population was evaluated");
            result.timed_out = true;
            return result;
        }

        let mut population: Vec<Individual> = (0..self.settings.population_size)
            .map(|_| self.random_individual(genome_len))
            .collect();
        let evaluations = evaluate(&mut population, cost);
        update_hall_of_fame(&mut result.best, &population);
        self.record(&mut result, 0, evaluations, &population);

        for generation in 1..=self.settings.generations {
            if expired(deadline) {
                warn!(generation, "deadline expired, returning best so far");
                result.timed_out = true;
                break;
            }
            let mut offspring = self.offspring(&population);
            let evaluations = evaluate(&mut offspring, cost);
            update_hall_of_fame(&mut result.best, &offspring);
            population = offspring;
            self.record(&mut result, generation, evaluations, &population);
        }

        if result.best.is_none() {
            warn!(
                evaluations = result.evaluations,
                "no candidate evaluated successfully"
            );
        }
        result
    }
}

impl GeneticOptimizer {
    fn record(
        &self,
        result: &mut OptimizationResult,
        generation: usize,
        evaluations: usize,
        population: &[Individual],
    ) {
        let stats = GenerationStats::collect(generation, evaluations, population);
        debug!(
            generation,
            evaluations,
            invalid = stats.invalid,
            min = ?stats.min,
            mean = ?stats.mean,
            best = ?result.best.as_ref().map(|b| b.cost),
            "generation evaluated"
        );
        result.evaluations += evaluations;
        result.generations.push(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MpcError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(population_size: usize, generations: usize) -> GaSettings {
        GaSettings {
            population_size,
            generations,
            ..GaSettings::default()
        }
    }

    fn distance_to_seven(genes: &[u8]) -> Result<f64> {
        Ok(genes.iter().map(|&g| (f64::from(g) - 7.0).abs()).sum())
    }

    #[test]
    fn finds_cheap_chromosome() {
        let mut ga = GeneticOptimizer::new(settings(60, 15));
        let result = ga.search(&distance_to_seven, 4, None);
        let best = result.best.expect("valid candidates exist");
        assert!(best.cost <= 2.0, "best cost {} too high", best.cost);
        assert_eq!(best.chromosome.len(), 4);
        assert_eq!(result.generations.len(), 16);
        assert!(!result.timed_out);
    }

    #[test]
    fn best_matches_reported_cost() {
        let mut ga = GeneticOptimizer::new(settings(20, 3));
        let result = ga.search(&distance_to_seven, 6, None);
        let best = result.best.expect("valid candidates exist");
        assert_eq!(distance_to_seven(&best.chromosome).ok(), Some(best.cost));
        let min_seen = result
            .generations
            .iter()
            .filter_map(|g| g.min)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(best.cost, min_seen);
    }

    #[test]
    fn failing_candidates_are_never_best() {
        // every chromosome starting with gene 0 fails, and it would otherwise be cheapest
        let cost = |genes: &[u8]| -> Result<f64> {
            if genes[0] == 0 {
                Err(MpcError::Evaluation("restore failed".to_string()))
            } else {
                Ok(f64::from(genes[0]))
            }
        };
        let mut ga = GeneticOptimizer::new(settings(80, 5));
        let result = ga.search(&cost, 3, None);
        let best = result.best.expect("some candidates succeed");
        assert_ne!(best.chromosome[0], 0);
        assert!(result.generations.iter().any(|g| g.invalid > 0));
    }

    #[test]
    fn non_finite_costs_are_invalid() {
        let cost = |_: &[u8]| -> Result<f64> { Ok(f64::NAN) };
        let mut ga = GeneticOptimizer::new(settings(10, 2));
        let result = ga.search(&cost, 2, None);
        assert!(result.best.is_none());
        assert!(result.generations.iter().all(|g| g.min.is_none()));
    }

    #[test]
    fn all_failing_gives_no_best() {
        let cost = |_: &[u8]| -> Result<f64> { Err(MpcError::Evaluation("boom".to_string())) };
        let mut ga = GeneticOptimizer::new(settings(10, 3));
        let result = ga.search(&cost, 4, None);
        assert!(result.best.is_none());
        assert_eq!(result.generations[0].invalid, 10);
        assert!(!result.timed_out);
    }

    #[test]
    fn same_seed_same_result() {
        let mut a = GeneticOptimizer::new(settings(30, 4));
        let mut b = GeneticOptimizer::new(settings(30, 4));
        assert_eq!(
            a.search(&distance_to_seven, 5, None),
            b.search(&distance_to_seven, 5, None)
        );
    }

    #[test]
    fn unchanged_offspring_are_not_reevaluated() {
        let calls = AtomicUsize::new(0);
        let cost = |genes: &[u8]| -> Result<f64> {
            calls.fetch_add(1, Ordering::Relaxed);
            distance_to_seven(genes)
        };
        let mut ga = GeneticOptimizer::new(GaSettings {
            crossover_probability: 0.0,
            mutation_probability: 0.0,
            ..settings(12, 4)
        });
        let result = ga.search(&cost, 3, None);
        assert_eq!(calls.load(Ordering::Relaxed), 12);
        assert_eq!(result.evaluations, 12);
        assert!(result.generations[1..].iter().all(|g| g.evaluations == 0));
    }

    #[test]
    fn expired_deadline_stops_before_evaluating() {
        let mut ga = GeneticOptimizer::new(settings(10, 3));
        let result = ga.search(&distance_to_seven, 2, Some(Instant::now()));
        assert!(result.timed_out);
        assert!(result.best.is_none());
        assert_eq!(result.evaluations, 0);
    }

    #[test]
    fn invalid_never_beats_valid() {
        let valid = Individual {
            genes: vec![1],
            fitness: Some(Fitness::Valid(1e9)),
        };
        let invalid = Individual {
            genes: vec![0],
            fitness: Some(Fitness::Invalid),
        };
        let pending = Individual::new(vec![0]);
        assert!(valid.beats(&invalid));
        assert!(valid.beats(&pending));
        assert!(!invalid.beats(&valid));
        assert!(!invalid.beats(&invalid));
        assert!(!pending.beats(&valid));
    }
}
