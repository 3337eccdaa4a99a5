// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Demo experiment for `darwin run`: maximise the number of set genes in a
//! fixed-length bit string.

use async_trait::async_trait;
use darwin_core::experiment::{Evaluator, Evolution, GeneticOperator};
use darwin_core::individual::{Individual, IndividualValue};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::time::Duration;
use tracing::info;

pub type BitString = Vec<u8>;

pub fn random_population(size: usize, genome_length: usize) -> Vec<IndividualValue<BitString>> {
    let mut rng = rand::rng();
    (0..size)
        .map(|_| {
            let genes = (0..genome_length).map(|_| rng.random_range(0..=1)).collect();
            IndividualValue::new(genes)
        })
        .collect()
}

/// Keeps the fitter half of the population and refills it with mutated
/// one-point crossovers of the survivors.
pub struct ElitistOperator {
    max_generations: u64,
    mutation_rate: f64,
}

impl ElitistOperator {
    pub fn new(max_generations: u64, mutation_rate: f64) -> Self {
        Self {
            max_generations,
            mutation_rate,
        }
    }

    fn breed(&self, mut population: Vec<IndividualValue<BitString>>) -> Vec<IndividualValue<BitString>> {
        let size = population.len();
        population.sort_by(|a, b| {
            b.fitness
                .unwrap_or(f64::MIN)
                .total_cmp(&a.fitness.unwrap_or(f64::MIN))
        });
        let elites: Vec<BitString> = population
            .into_iter()
            .take(size.div_ceil(2))
            .map(|value| value.encoding)
            .collect();

        let mut rng = rand::rng();
        let mut next: Vec<IndividualValue<BitString>> =
            elites.iter().cloned().map(IndividualValue::new).collect();
        while next.len() < size {
            let (Some(left), Some(right)) = (elites.choose(&mut rng), elites.choose(&mut rng)) else {
                break;
            };
            let cut = rng.random_range(0..=left.len());
            let mut child: BitString = left[..cut].iter().chain(&right[cut..]).copied().collect();
            for gene in child.iter_mut() {
                if rng.random_bool(self.mutation_rate) {
                    *gene ^= 1;
                }
            }
            next.push(IndividualValue::new(child));
        }
        next
    }
}

#[async_trait]
impl GeneticOperator<BitString> for ElitistOperator {
    async fn apply_genetic_operations(
        &self,
        generation_number: u64,
        population: Vec<IndividualValue<BitString>>,
    ) -> Evolution<BitString> {
        let best = population
            .iter()
            .filter_map(|value| value.fitness)
            .fold(0.0, f64::max);
        let genome_length = population.first().map_or(0, |value| value.encoding.len());
        info!(generation_number, best, "Generation evaluated");

        if generation_number >= self.max_generations || best >= genome_length as f64 {
            return Evolution::Stop;
        }
        Evolution::Next(self.breed(population))
    }
}

/// Fitness is the number of set genes. `delay` simulates an expensive
/// evaluation.
pub struct GeneSumEvaluator {
    delay: Duration,
}

impl GeneSumEvaluator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Evaluator<BitString> for GeneSumEvaluator {
    async fn evaluate_sample(&self, sample: Vec<Individual<BitString>>) -> Vec<Individual<BitString>> {
        tokio::time::sleep(self.delay).await;
        sample
            .into_iter()
            .map(|individual| {
                let fitness = individual.encoding.iter().map(|&gene| f64::from(gene)).sum();
                individual.with_fitness(fitness)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluator_counts_set_genes() {
        let evaluator = GeneSumEvaluator::new(Duration::ZERO);
        let sample = vec![Individual::new(Default::default(), vec![1, 0, 1, 1])];

        let evaluated = evaluator.evaluate_sample(sample).await;

        assert_eq!(evaluated[0].fitness, Some(3.0));
    }

    #[tokio::test]
    async fn test_operator_keeps_population_size_and_elite() {
        let operator = ElitistOperator::new(10, 0.0);
        let population = vec![
            IndividualValue { encoding: vec![1, 1, 1, 0], fitness: Some(3.0) },
            IndividualValue { encoding: vec![0, 0, 0, 0], fitness: Some(0.0) },
            IndividualValue { encoding: vec![1, 0, 0, 0], fitness: Some(1.0) },
        ];

        let Evolution::Next(next) = operator.apply_genetic_operations(1, population).await else {
            panic!("expected a next generation");
        };

        assert_eq!(next.len(), 3);
        assert_eq!(next[0].encoding, vec![1, 1, 1, 0]);
        assert!(next.iter().all(|value| value.fitness.is_none()));
    }

    #[tokio::test]
    async fn test_operator_stops_on_generation_cap_or_optimum() {
        let operator = ElitistOperator::new(2, 0.1);
        let evaluated = vec![IndividualValue { encoding: vec![0, 1], fitness: Some(1.0) }];
        assert!(matches!(
            operator.apply_genetic_operations(2, evaluated).await,
            Evolution::Stop
        ));

        let optimal = vec![IndividualValue { encoding: vec![1, 1], fitness: Some(2.0) }];
        assert!(matches!(
            operator.apply_genetic_operations(1, optimal).await,
            Evolution::Stop
        ));

        assert_eq!(random_population(5, 8).len(), 5);
    }
}
