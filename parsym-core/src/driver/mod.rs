//! The solve orchestrator.
//!
//! [`ParTSymDriver`] is the top-level entry point: it sequences structure
//! management, distributed gathering, scaling, engine invocation, and
//! un-scaling for repeated solves of a distributed symmetric indefinite
//! system. Engine calls happen on the coordinator only, unless
//! replication is configured, in which case every rank runs its own
//! engine on its local shard and no gathering takes place.

mod gather;
mod structure;

use log::debug;

use crate::comm::{Collective, ProcessRole};
use crate::engine::{EngineError, EngineMatrix, MatrixFormat, SolveStatus, SymLinearEngine};
use crate::error::{DriverError, DriverResult};
use crate::linalg::triplet::DistributedTripletMatrix;
use crate::scaling::ScalingMethod;
use crate::settings::DriverSettings;
use structure::MatrixStructure;

/// Per-solve-sequence state of the orchestrator.
struct SolveState {
    engine_initialized: bool,
    seen_values_tag: Option<u64>,
    num_neg_evals: Option<usize>,
}

/// Scaling factors and their lifecycle flags.
struct ScalingState {
    factors: Option<Vec<f64>>,
    active: bool,
    /// Scaling was just switched on; the next solve must treat the
    /// matrix as entirely new even though the pattern did not change.
    just_switched_on: bool,
}

/// Driver for sparse symmetric indefinite linear systems whose entries
/// are distributed across a fixed set of processes.
///
/// The driver owns its engine, optional scaling method, and
/// communicator exclusively; every rank constructs its own driver and
/// all ranks call [`multi_solve`](Self::multi_solve) in lockstep.
pub struct ParTSymDriver {
    engine: Box<dyn SymLinearEngine>,
    scaling_method: Option<Box<dyn ScalingMethod>>,
    comm: Box<dyn Collective>,
    settings: DriverSettings,

    structure: MatrixStructure,
    state: SolveState,
    scaling: ScalingState,
}

impl ParTSymDriver {
    /// Create a driver.
    ///
    /// Fails when the settings reference a scaling method that was not
    /// supplied, or combine scaling with replicated engine calls (scale
    /// factors are computed from the assembled matrix, which does not
    /// exist when gathering is skipped).
    pub fn new(
        engine: Box<dyn SymLinearEngine>,
        scaling_method: Option<Box<dyn ScalingMethod>>,
        comm: Box<dyn Collective>,
        settings: DriverSettings,
    ) -> DriverResult<Self> {
        if (settings.use_scaling || settings.scaling_on_demand) && scaling_method.is_none() {
            return Err(DriverError::Config(
                "scaling requested but no scaling method supplied".to_string(),
            ));
        }
        if settings.call_on_all_procs && scaling_method.is_some() {
            return Err(DriverError::Config(
                "scaling cannot be combined with replicated engine calls".to_string(),
            ));
        }
        let active = settings.use_scaling;
        Ok(Self {
            engine,
            scaling_method,
            comm,
            settings,
            structure: MatrixStructure::new(),
            state: SolveState {
                engine_initialized: false,
                seen_values_tag: None,
                num_neg_evals: None,
            },
            scaling: ScalingState {
                factors: None,
                active,
                just_switched_on: false,
            },
        })
    }

    /// Solve `A x = b` for each right-hand side in `rhs_sol`, which is
    /// overwritten with the solutions.
    ///
    /// All ranks must call this in lockstep with their local shard of
    /// the same logical matrix. Solutions are broadcast, so on success
    /// every rank returns identical vectors. On any status other than
    /// [`SolveStatus::Success`] the contents of `rhs_sol` are
    /// unspecified and must not be used.
    ///
    /// With `check_neg_evals` set, a factorization whose
    /// negative-eigenvalue count differs from `expected_neg_evals` is
    /// reported as [`SolveStatus::WrongInertia`].
    pub fn multi_solve(
        &mut self,
        matrix: &DistributedTripletMatrix,
        rhs_sol: &mut [Vec<f64>],
        check_neg_evals: bool,
        expected_neg_evals: usize,
    ) -> DriverResult<SolveStatus> {
        let replicate = self.settings.call_on_all_procs;
        let role = self.comm.topology().role();
        let engine_rank = replicate || role == ProcessRole::Coordinator;
        let dim = matrix.dim();
        let nrhs = rhs_sol.len();

        for rhs in rhs_sol.iter() {
            if rhs.len() != dim {
                return Err(DriverError::Config(format!(
                    "right-hand side has length {}, matrix dimension is {}",
                    rhs.len(),
                    dim
                )));
            }
        }

        // Value-derived state resets on every solve.
        self.state.num_neg_evals = None;

        // (i) structure management. The rebuild decision must be
        // collective: one rank seeing a change forces everyone through
        // the structural gathers.
        let local_needs = self.structure.needs_rebuild(matrix);
        let rebuild = if replicate {
            local_needs
        } else {
            self.agree_any(local_needs)?
        };
        if rebuild {
            self.structure.rebuild(
                matrix,
                self.comm.as_ref(),
                self.engine.matrix_format(),
                replicate,
            )?;
            self.state.engine_initialized = false;
        }

        // Whether the matrix must be refactorized is likewise a
        // collective decision: a single rank rewriting its shard values
        // invalidates the coordinator's factorization even when every
        // other shard is unchanged.
        let local_new_values = self.state.seen_values_tag != Some(matrix.values_tag());
        self.state.seen_values_tag = Some(matrix.values_tag());
        let new_values = if replicate {
            local_new_values
        } else {
            self.agree_any(local_new_values)?
        };
        let new_matrix = rebuild || new_values || self.scaling.just_switched_on;
        self.scaling.just_switched_on = false;

        // (iii) value assembly, on every solve.
        let gathered = if replicate {
            Some(matrix.values().to_vec())
        } else {
            gather::gather_values(matrix, self.structure.layout(), self.comm.as_ref())?
        };

        let mut status = SolveStatus::Success;
        let mut engine_err: Option<EngineError> = None;
        if engine_rank {
            let mut values = gathered.unwrap_or_default();

            // (iv) scaling: recompute factors for every new matrix, then
            // apply them to values and right-hand sides.
            if self.scaling.active {
                if new_matrix {
                    let method = self.scaling_method.as_ref().unwrap();
                    self.scaling.factors = method.compute_factors(
                        dim,
                        self.structure.assembled_rows(),
                        self.structure.assembled_cols(),
                        &values,
                    );
                    if self.scaling.factors.is_none() {
                        debug!("scaling method declined to scale this matrix");
                    }
                }
                if let Some(factors) = &self.scaling.factors {
                    for ((v, &i), &j) in values
                        .iter_mut()
                        .zip(self.structure.assembled_rows())
                        .zip(self.structure.assembled_cols())
                    {
                        *v *= factors[i] * factors[j];
                    }
                }
            }

            self.structure.refresh_compressed(&values);

            let mut flat = Vec::with_capacity(nrhs * dim);
            for rhs in rhs_sol.iter() {
                flat.extend_from_slice(rhs);
            }
            if self.scaling.active {
                if let Some(factors) = &self.scaling.factors {
                    for chunk in flat.chunks_mut(dim) {
                        for (x, &f) in chunk.iter_mut().zip(factors.iter()) {
                            *x *= f;
                        }
                    }
                }
            }

            // (ii) engine structural init, deferred until the matrix
            // view exists; (v) factorize and solve. Engine errors are
            // deferred until after the outcome broadcast: workers are
            // waiting on it, and bailing out here would strand them.
            status = {
                let em = match self.engine.matrix_format() {
                    MatrixFormat::CompressedUpper => EngineMatrix::CompressedUpper(
                        self.structure.compressed_matrix().unwrap(),
                    ),
                    MatrixFormat::Triplet => EngineMatrix::Triplet {
                        dim,
                        rows: self.structure.assembled_rows(),
                        cols: self.structure.assembled_cols(),
                        values: &values,
                    },
                };
                let init = if !self.state.engine_initialized {
                    debug!("initializing engine structure, dim = {}", dim);
                    let result = self.engine.init_structure(&em);
                    if result.is_ok() {
                        self.state.engine_initialized = true;
                    }
                    result
                } else {
                    Ok(())
                };
                let solved = match init {
                    Ok(()) => self.engine.multi_solve(
                        new_matrix,
                        &em,
                        &mut flat,
                        nrhs,
                        check_neg_evals,
                        expected_neg_evals,
                    ),
                    Err(e) => Err(e),
                };
                match solved {
                    Ok(s) => s,
                    Err(e) => {
                        engine_err = Some(e);
                        SolveStatus::Fatal
                    }
                }
            };

            // (vii) record the inertia of this factorization. Available
            // on a failed inertia check too, so the caller can react.
            if matches!(status, SolveStatus::Success | SolveStatus::WrongInertia) {
                self.state.num_neg_evals = self.engine.num_neg_evals();
            }

            if status == SolveStatus::Success {
                // (vi) un-scale solutions back to the original system.
                if self.scaling.active {
                    if let Some(factors) = &self.scaling.factors {
                        for chunk in flat.chunks_mut(dim) {
                            for (x, &f) in chunk.iter_mut().zip(factors.iter()) {
                                *x *= f;
                            }
                        }
                    }
                }
                for (rhs, chunk) in rhs_sol.iter_mut().zip(flat.chunks(dim)) {
                    rhs.copy_from_slice(chunk);
                }
            } else {
                debug!("engine reported {:?}", status);
            }
        }

        // Propagate outcome and solutions; workers block here until the
        // coordinator's solve completed.
        if !replicate {
            let code = if engine_rank { status_code(status) } else { 0 };
            status = status_from_code(self.comm.broadcast_scalar(code)?);

            let neg = if engine_rank {
                self.state.num_neg_evals.map_or(0, |n| n as u64 + 1)
            } else {
                0
            };
            let neg = self.comm.broadcast_scalar(neg)?;
            self.state.num_neg_evals = if neg == 0 {
                None
            } else {
                Some((neg - 1) as usize)
            };

            if status == SolveStatus::Success {
                for rhs in rhs_sol.iter_mut() {
                    self.comm.broadcast_f64(rhs)?;
                }
            }
        }

        // The rank whose engine rejected its input reports the error;
        // the others have already seen the Fatal status.
        if let Some(e) = engine_err {
            return Err(e.into());
        }
        Ok(status)
    }

    /// Collective OR over one boolean per rank: the coordinator gathers
    /// the flags and broadcasts whether any rank raised one, so every
    /// rank takes the same branch afterwards.
    fn agree_any(&self, local: bool) -> DriverResult<bool> {
        let flags = self.comm.gather_scalar(usize::from(local))?;
        let any = flags
            .map(|f| u64::from(f.iter().any(|&x| x > 0)))
            .unwrap_or(0);
        Ok(self.comm.broadcast_scalar(any)? != 0)
    }

    /// Negative-eigenvalue count recorded by the most recent
    /// factorization that produced one (including a factorization whose
    /// inertia check failed); `None` when no such factorization exists.
    pub fn num_neg_evals(&self) -> Option<usize> {
        self.state.num_neg_evals
    }

    /// Request a more conservative numerical strategy for subsequent
    /// solves.
    ///
    /// When a scaling method is configured but currently inactive and
    /// scaling-on-demand is allowed, this switches scaling on instead of
    /// asking the engine; the next solve then treats the matrix as
    /// entirely new. Returns `false`, with no state change, when nothing
    /// further is available.
    pub fn increase_quality(&mut self) -> bool {
        if self.scaling_method.is_some()
            && !self.scaling.active
            && self.settings.scaling_on_demand
        {
            debug!("increase_quality: switching scaling on");
            self.scaling.active = true;
            self.scaling.just_switched_on = true;
            return true;
        }
        self.engine.increase_quality()
    }

    /// Whether the engine reports inertia. Valid before any solve.
    pub fn provides_inertia(&self) -> bool {
        self.engine.provides_inertia()
    }

    /// Number of structural rebuilds performed so far.
    pub fn structure_rebuilds(&self) -> u64 {
        self.structure.rebuild_count()
    }

    /// Whether scaling is currently active.
    pub fn scaling_active(&self) -> bool {
        self.scaling.active
    }

    /// Prepare for a new problem instance.
    ///
    /// Without `warm_start_same_structure`, all structural and engine
    /// state is dropped and the next solve rebuilds from scratch. With
    /// it, cached index arrays, layouts, and the engine's symbolic state
    /// are kept and the next matrix is trusted to have the same pattern
    /// (a shard-size mismatch still forces a rebuild).
    pub fn reset(&mut self) {
        self.state.num_neg_evals = None;
        self.state.seen_values_tag = None;
        self.scaling.factors = None;
        if self.settings.warm_start_same_structure {
            self.structure.adopt_next();
        } else {
            self.structure.clear();
            self.state.engine_initialized = false;
        }
    }
}

fn status_code(status: SolveStatus) -> u64 {
    match status {
        SolveStatus::Success => 0,
        SolveStatus::Singular => 1,
        SolveStatus::WrongInertia => 2,
        SolveStatus::Fatal => 3,
    }
}

fn status_from_code(code: u64) -> SolveStatus {
    match code {
        0 => SolveStatus::Success,
        1 => SolveStatus::Singular,
        2 => SolveStatus::WrongInertia,
        _ => SolveStatus::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use crate::engine::{DenseEigenEngine, LdlEngine};
    use crate::scaling::RuizEquilibration;

    fn driver_with(engine: Box<dyn SymLinearEngine>, settings: DriverSettings) -> ParTSymDriver {
        ParTSymDriver::new(engine, None, Box::new(SingleProcess), settings).unwrap()
    }

    #[test]
    fn test_rejects_scaling_without_method() {
        let settings = DriverSettings {
            use_scaling: true,
            ..Default::default()
        };
        let result = ParTSymDriver::new(
            Box::new(LdlEngine::new()),
            None,
            Box::new(SingleProcess),
            settings,
        );
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_rejects_scaling_with_replication() {
        let settings = DriverSettings {
            call_on_all_procs: true,
            ..Default::default()
        };
        let result = ParTSymDriver::new(
            Box::new(LdlEngine::new()),
            Some(Box::new(RuizEquilibration::new(3))),
            Box::new(SingleProcess),
            settings,
        );
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_scaling_on_demand_switches_on_once() {
        let settings = DriverSettings {
            use_scaling: false,
            scaling_on_demand: true,
            ..Default::default()
        };
        let mut driver = ParTSymDriver::new(
            Box::new(DenseEigenEngine::new()),
            Some(Box::new(RuizEquilibration::new(3))),
            Box::new(SingleProcess),
            settings,
        )
        .unwrap();

        assert!(!driver.scaling_active());
        assert!(driver.increase_quality());
        assert!(driver.scaling_active());
        // Already on: falls through to the engine, which has no ladder.
        assert!(!driver.increase_quality());
    }

    #[test]
    fn test_provides_inertia_is_static() {
        let driver = driver_with(Box::new(LdlEngine::new()), DriverSettings::default());
        assert!(driver.provides_inertia());
    }

    #[test]
    fn test_rhs_dimension_validated() {
        let mut driver = driver_with(Box::new(LdlEngine::new()), DriverSettings::default());
        let mut a = DistributedTripletMatrix::new(2);
        a.set_structure(vec![0, 1], vec![0, 1]);
        a.set_values(vec![1.0, 1.0]);
        let mut rhs = vec![vec![1.0, 2.0, 3.0]];
        assert!(matches!(
            driver.multi_solve(&a, &mut rhs, false, 0),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_no_neg_evals_before_first_solve() {
        let driver = driver_with(Box::new(LdlEngine::new()), DriverSettings::default());
        assert_eq!(driver.num_neg_evals(), None);
    }
}
