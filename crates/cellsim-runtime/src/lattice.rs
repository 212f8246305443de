//! Reaction-diffusion lattice - the spatial field shared by all agents.
//!
//! A 2-D grid of per-species concentrations. Each step moves mass between
//! edge-adjacent cells by pairwise fluxes (so diffusion conserves the total
//! exactly, with no-flux boundaries) and then evaluates every reaction in
//! every cell.

use cellsim_core::config::{diffusion_substeps, KineticLaw, SpatialConfig, MAX_DIFFUSION_SUBSTEPS};
use cellsim_core::types::Position;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Reaction {
    id: String,
    /// `(species index, coefficient)`.
    stoichiometry: Vec<(usize, f64)>,
    law: Law,
}

#[derive(Debug, Clone)]
enum Law {
    MichaelisMenten {
        kcat: f64,
        km: f64,
        substrate: usize,
        catalyst: Option<usize>,
    },
    MassAction {
        k: f64,
        reactants: Vec<(usize, f64)>,
    },
}

impl Law {
    fn rate(&self, conc: impl Fn(usize) -> f64) -> f64 {
        match self {
            Law::MichaelisMenten {
                kcat,
                km,
                substrate,
                catalyst,
            } => {
                let s = conc(*substrate).max(0.0);
                let e = catalyst.map_or(1.0, |c| conc(c).max(0.0));
                kcat * e * s / (km + s)
            }
            Law::MassAction { k, reactants } => reactants
                .iter()
                .fold(*k, |rate, (species, order)| rate * conc(*species).max(0.0).powf(*order)),
        }
    }
}

/// The shared concentration field.
#[derive(Debug, Clone)]
pub struct Lattice {
    nx: usize,
    ny: usize,
    cell_size: f64,
    cell_volume: f64,
    species: Vec<String>,
    index: BTreeMap<String, usize>,
    diffusion: Vec<f64>,
    /// `conc[species][cell]`, cells in row-major order (`x + y * nx`).
    conc: Vec<Vec<f64>>,
    reactions: Vec<Reaction>,
}

impl Lattice {
    /// Build the field. The configuration must already be validated.
    pub fn from_config(config: &SpatialConfig) -> Self {
        let [nx, ny] = config.shape;
        let cells = nx * ny;
        let index: BTreeMap<String, usize> = config
            .species
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let lookup = |name: &str| index.get(name).copied().unwrap_or(0);

        let reactions = config
            .reactions
            .iter()
            .map(|r| Reaction {
                id: r.id.clone(),
                stoichiometry: r
                    .stoichiometry
                    .iter()
                    .map(|(name, coef)| (lookup(name), *coef))
                    .collect(),
                law: match &r.law {
                    KineticLaw::MichaelisMenten {
                        kcat,
                        km,
                        substrate,
                        catalyst,
                    } => Law::MichaelisMenten {
                        kcat: *kcat,
                        km: *km,
                        substrate: lookup(substrate),
                        catalyst: catalyst.as_deref().map(lookup),
                    },
                    KineticLaw::MassAction { k, reactants } => Law::MassAction {
                        k: *k,
                        reactants: reactants
                            .iter()
                            .map(|(name, order)| (lookup(name), *order))
                            .collect(),
                    },
                },
            })
            .collect();

        Self {
            nx,
            ny,
            cell_size: config.cell_size,
            cell_volume: config.cell_volume,
            species: config.species.iter().map(|s| s.name.clone()).collect(),
            diffusion: config.species.iter().map(|s| s.diffusion).collect(),
            conc: config.species.iter().map(|s| vec![s.initial; cells]).collect(),
            index,
            reactions,
        }
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.nx, self.ny]
    }

    pub fn cells(&self) -> usize {
        self.nx * self.ny
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_volume
    }

    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn has_species(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Grid cell containing `pos`. Positions outside the grid map to the
    /// nearest edge cell.
    pub fn cell_of(&self, pos: Position) -> usize {
        let clamp = |v: f64, n: usize| {
            let i = (v / self.cell_size).floor();
            if i.is_nan() || i < 0.0 {
                0
            } else {
                (i as usize).min(n - 1)
            }
        };
        clamp(pos.x, self.nx) + clamp(pos.y, self.ny) * self.nx
    }

    pub fn concentration(&self, species: &str, cell: usize) -> Option<f64> {
        self.index.get(species).map(|&s| self.conc[s][cell])
    }

    /// Amount (concentration × cell volume) of `species` in `cell`.
    pub fn amount(&self, species: &str, cell: usize) -> Option<f64> {
        self.concentration(species, cell).map(|c| c * self.cell_volume)
    }

    /// Concentrations of every species in one cell.
    pub fn concentrations_at(&self, cell: usize) -> BTreeMap<String, f64> {
        self.species
            .iter()
            .enumerate()
            .map(|(s, name)| (name.clone(), self.conc[s][cell]))
            .collect()
    }

    /// Add `delta` units of amount to `species` in `cell`.
    ///
    /// Fails without changing anything if the result would be negative.
    pub fn add_amount(&mut self, species: &str, cell: usize, delta: f64) -> Result<(), String> {
        let s = *self
            .index
            .get(species)
            .ok_or_else(|| format!("unknown species `{}`", species))?;
        if !delta.is_finite() {
            return Err(format!("non-finite delta {} for `{}`", delta, species));
        }
        let next = self.conc[s][cell] + delta / self.cell_volume;
        if next < -1e-9 {
            return Err(format!(
                "removing {} of `{}` from cell {} leaves {}",
                -delta,
                species,
                cell,
                next * self.cell_volume
            ));
        }
        self.conc[s][cell] = next.max(0.0);
        Ok(())
    }

    /// Total amount of `species` over the whole grid.
    pub fn total_amount(&self, species: &str) -> f64 {
        self.index
            .get(species)
            .map(|&s| self.conc[s].iter().sum::<f64>() * self.cell_volume)
            .unwrap_or(0.0)
    }

    /// Total amount of every species.
    pub fn totals(&self) -> BTreeMap<String, f64> {
        self.species
            .iter()
            .map(|name| (name.clone(), self.total_amount(name)))
            .collect()
    }

    /// Advance the field by `dt`: diffusion, then reactions.
    pub fn step(&mut self, dt: f64) {
        for s in 0..self.species.len() {
            self.diffuse(s, dt);
        }
        for cell in 0..self.cells() {
            for r in 0..self.reactions.len() {
                self.react(r, cell, dt);
            }
        }
    }

    fn diffuse(&mut self, s: usize, dt: f64) {
        let coefficient = self.diffusion[s];
        if coefficient <= 0.0 || self.cells() < 2 {
            return;
        }
        let number = coefficient * dt / (self.cell_size * self.cell_size);
        // Configurations past the cap are rejected at validation.
        let substeps = (diffusion_substeps(coefficient, dt, self.cell_size) as usize).min(MAX_DIFFUSION_SUBSTEPS);
        let r = number / substeps as f64;

        let (nx, ny) = (self.nx, self.ny);
        let field = &mut self.conc[s];
        let mut next = field.clone();
        for _ in 0..substeps {
            next.copy_from_slice(field);
            for y in 0..ny {
                for x in 0..nx {
                    let here = x + y * nx;
                    if x + 1 < nx {
                        let flux = r * (field[here] - field[here + 1]);
                        next[here] -= flux;
                        next[here + 1] += flux;
                    }
                    if y + 1 < ny {
                        let flux = r * (field[here] - field[here + nx]);
                        next[here] -= flux;
                        next[here + nx] += flux;
                    }
                }
            }
            field.copy_from_slice(&next);
        }
    }

    fn react(&mut self, r: usize, cell: usize, dt: f64) {
        let reaction = &self.reactions[r];
        let conc = &self.conc;
        let rate = reaction.law.rate(|s| conc[s][cell]);
        if !(rate > 0.0) {
            return;
        }

        // The extent may not drive any reactant below zero.
        let mut extent = rate * dt;
        for &(s, coef) in &reaction.stoichiometry {
            if coef < 0.0 {
                extent = extent.min(conc[s][cell].max(0.0) / -coef);
            }
        }
        let changes: Vec<(usize, f64)> = reaction
            .stoichiometry
            .iter()
            .map(|&(s, coef)| (s, coef * extent))
            .collect();
        for (s, change) in changes {
            self.conc[s][cell] = (self.conc[s][cell] + change).max(0.0);
        }
    }

    /// Reaction ids, in evaluation order.
    pub fn reaction_ids(&self) -> impl Iterator<Item = &str> {
        self.reactions.iter().map(|r| r.id.as_str())
    }
}
