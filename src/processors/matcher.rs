use crate::error::{PipelineError, Result};
use crate::models::{Observation, StationSummary};
use crate::utils::constants::DISTANCE_TIE_SCALE;
use crate::utils::coordinates::{haversine_distance, meridional_distance};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Relative slack applied to the latitude lower bound so float rounding in the
/// haversine can never make the bound exceed a true distance
const LOWER_BOUND_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Compare every observation against every station
    BruteForce,
    /// Latitude-sorted sweep with exact pruning
    #[default]
    Indexed,
}

impl FromStr for MatchStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "brute-force" | "brute_force" | "bruteforce" => Ok(MatchStrategy::BruteForce),
            "indexed" | "index" | "sweep" => Ok(MatchStrategy::Indexed),
            other => Err(PipelineError::Config(format!(
                "Unknown matcher strategy '{}': expected 'brute-force' or 'indexed'",
                other
            ))),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::BruteForce => write!(f, "brute-force"),
            MatchStrategy::Indexed => write!(f, "indexed"),
        }
    }
}

/// An observation with its nearest station
#[derive(Debug, Clone, PartialEq)]
pub struct NearestPair {
    pub observation: Observation,
    pub station: StationSummary,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Vec<NearestPair>),
    /// No station survived aggregation; every observation stays unmatched
    NoStationsAvailable { unmatched: Vec<Observation> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchStats {
    pub observations_matched: usize,
    pub observations_unmatched: usize,
    pub min_distance_km: Option<f64>,
    pub mean_distance_km: Option<f64>,
    pub max_distance_km: Option<f64>,
}

impl MatchOutcome {
    pub fn stats(&self) -> MatchStats {
        match self {
            MatchOutcome::NoStationsAvailable { unmatched } => MatchStats {
                observations_unmatched: unmatched.len(),
                ..Default::default()
            },
            MatchOutcome::Matched(pairs) if pairs.is_empty() => MatchStats::default(),
            MatchOutcome::Matched(pairs) => {
                let distances = pairs.iter().map(|p| p.distance_km);
                MatchStats {
                    observations_matched: pairs.len(),
                    observations_unmatched: 0,
                    min_distance_km: distances.clone().reduce(f64::min),
                    mean_distance_km: Some(distances.clone().sum::<f64>() / pairs.len() as f64),
                    max_distance_km: distances.reduce(f64::max),
                }
            }
        }
    }
}

/// Distances compared at micro-km resolution; ties go to the smaller station id
fn tie_key(distance_km: f64) -> i64 {
    (distance_km * DISTANCE_TIE_SCALE).round() as i64
}

fn better(key: i64, id: &str, best_key: i64, best_id: &str) -> bool {
    match key.cmp(&best_key) {
        Ordering::Less => true,
        Ordering::Equal => id < best_id,
        Ordering::Greater => false,
    }
}

trait StationLocator: Sync {
    /// Index into the station slice and the distance to it
    fn nearest(&self, latitude: f64, longitude: f64) -> (usize, f64);
}

struct BruteForceLocator<'a> {
    stations: &'a [StationSummary],
}

impl StationLocator for BruteForceLocator<'_> {
    fn nearest(&self, latitude: f64, longitude: f64) -> (usize, f64) {
        let mut best = 0;
        let mut best_distance = distance_to(&self.stations[0], latitude, longitude);
        let mut best_key = tie_key(best_distance);

        for (index, station) in self.stations.iter().enumerate().skip(1) {
            let distance = distance_to(station, latitude, longitude);
            let key = tie_key(distance);
            if better(key, station.id(), best_key, self.stations[best].id()) {
                best = index;
                best_distance = distance;
                best_key = key;
            }
        }

        (best, best_distance)
    }
}

/// Stations sorted by latitude. A query walks outward from its own latitude
/// and stops once the latitude gap alone exceeds the best distance found.
pub struct LatitudeSweepIndex<'a> {
    stations: &'a [StationSummary],
    order: Vec<usize>,
    latitudes: Vec<f64>,
}

impl<'a> LatitudeSweepIndex<'a> {
    /// `stations` must be non-empty
    pub fn build(stations: &'a [StationSummary]) -> Self {
        let mut order: Vec<usize> = (0..stations.len()).collect();
        order.sort_by(|&a, &b| {
            stations[a]
                .latitude()
                .total_cmp(&stations[b].latitude())
                .then_with(|| stations[a].id().cmp(stations[b].id()))
        });
        let latitudes = order.iter().map(|&i| stations[i].latitude()).collect();

        Self {
            stations,
            order,
            latitudes,
        }
    }

    fn bound_key(&self, latitude: f64, position: usize) -> i64 {
        let bound = meridional_distance(latitude, self.latitudes[position]);
        tie_key(bound * (1.0 - LOWER_BOUND_SLACK) - LOWER_BOUND_SLACK)
    }
}

impl StationLocator for LatitudeSweepIndex<'_> {
    fn nearest(&self, latitude: f64, longitude: f64) -> (usize, f64) {
        let start = self.latitudes.partition_point(|&lat| lat < latitude);
        // `below` walks down from start-1, `above` walks up from start
        let mut below = start;
        let mut above = start;
        let mut best: Option<(usize, f64, i64)> = None;

        loop {
            let next_below = below.checked_sub(1);
            let next_above = (above < self.latitudes.len()).then_some(above);

            let position = match (next_below, next_above) {
                (None, None) => break,
                (Some(b), None) => b,
                (None, Some(a)) => a,
                (Some(b), Some(a)) => {
                    if (latitude - self.latitudes[b]).abs() <= (self.latitudes[a] - latitude).abs() {
                        b
                    } else {
                        a
                    }
                }
            };

            if let Some((_, _, best_key)) = best {
                // The chosen side is the closer in latitude, so nothing on
                // either side can still beat the current best
                if self.bound_key(latitude, position) > best_key {
                    break;
                }
            }

            let index = self.order[position];
            let station = &self.stations[index];
            let distance = distance_to(station, latitude, longitude);
            let key = tie_key(distance);

            let replace = match best {
                None => true,
                Some((best_index, _, best_key)) => {
                    better(key, station.id(), best_key, self.stations[best_index].id())
                }
            };
            if replace {
                best = Some((index, distance, key));
            }

            if Some(position) == next_below {
                below -= 1;
            } else {
                above += 1;
            }
        }

        match best {
            Some((index, distance, _)) => (index, distance),
            // Unreachable for a non-empty index
            None => (0, distance_to(&self.stations[0], latitude, longitude)),
        }
    }
}

fn distance_to(station: &StationSummary, latitude: f64, longitude: f64) -> f64 {
    haversine_distance(latitude, longitude, station.latitude(), station.longitude())
}

/// Pairs every observation with its nearest station summary.
pub struct NearestStationMatcher {
    strategy: MatchStrategy,
}

impl NearestStationMatcher {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Output order follows input order; both strategies return identical pairs
    pub fn match_nearest(
        &self,
        observations: Vec<Observation>,
        stations: &[StationSummary],
    ) -> MatchOutcome {
        if stations.is_empty() {
            warn!(
                observations = observations.len(),
                "no stations with valid readings; every observation is unmatched"
            );
            return MatchOutcome::NoStationsAvailable {
                unmatched: observations,
            };
        }

        debug!(
            strategy = %self.strategy,
            observations = observations.len(),
            stations = stations.len(),
            "matching observations to nearest stations"
        );

        match self.strategy {
            MatchStrategy::BruteForce => {
                Self::run(observations, stations, &BruteForceLocator { stations })
            }
            MatchStrategy::Indexed => {
                Self::run(observations, stations, &LatitudeSweepIndex::build(stations))
            }
        }
    }

    fn run<L: StationLocator>(
        observations: Vec<Observation>,
        stations: &[StationSummary],
        locator: &L,
    ) -> MatchOutcome {
        let pairs = observations
            .into_par_iter()
            .map(|observation| {
                let (index, distance_km) =
                    locator.nearest(observation.latitude, observation.longitude);
                NearestPair {
                    observation,
                    station: stations[index].clone(),
                    distance_km,
                }
            })
            .collect();

        MatchOutcome::Matched(pairs)
    }
}

impl Default for NearestStationMatcher {
    fn default() -> Self {
        Self::new(MatchStrategy::default())
    }
}
