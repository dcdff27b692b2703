//! Per-objective cost models
//!
//! Every model maps a (process, target) pair to a normalized cost in
//! [0, 1]. Unbounded quantities (money, milliseconds, queue length) are
//! squashed with `x / (x + scale)` using scales from [`CostParameters`].
//! Placement and scaling share one [`CostModelSet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{require_non_negative, require_positive};
use crate::models::{ExecutionTarget, ObjectiveKind, Process, Proximity, SystemState};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Price per GB moved between two locations, by proximity class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPricing {
    pub same_location: f64,
    pub same_region: f64,
    pub adjacent_region: f64,
    pub different_provider: f64,
}

impl TransferPricing {
    pub fn price(&self, proximity: Proximity) -> f64 {
        match proximity {
            Proximity::SameLocation => self.same_location,
            Proximity::SameRegion => self.same_region,
            Proximity::AdjacentRegion => self.adjacent_region,
            Proximity::DifferentProvider => self.different_provider,
        }
    }
}

/// Explicit cost parameters. None of these has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostParameters {
    pub transfer: TransferPricing,
    /// Runtime of a process on one baseline core with no contention
    pub reference_runtime_ms: f64,
    pub energy_price_per_kwh: f64,
    pub queue_depth_scale: f64,
    pub network_cost_scale: f64,
    pub latency_scale_ms: f64,
    pub compute_cost_scale: f64,
    pub energy_cost_scale: f64,
    pub throughput_scale: f64,
}

impl CostParameters {
    pub fn validate(&self) -> Result<(), String> {
        require_non_negative("cost.transfer.same_location", self.transfer.same_location)?;
        require_non_negative("cost.transfer.same_region", self.transfer.same_region)?;
        require_non_negative("cost.transfer.adjacent_region", self.transfer.adjacent_region)?;
        require_non_negative(
            "cost.transfer.different_provider",
            self.transfer.different_provider,
        )?;
        require_positive("cost.reference_runtime_ms", self.reference_runtime_ms)?;
        require_non_negative("cost.energy_price_per_kwh", self.energy_price_per_kwh)?;
        require_positive("cost.queue_depth_scale", self.queue_depth_scale)?;
        require_positive("cost.network_cost_scale", self.network_cost_scale)?;
        require_positive("cost.latency_scale_ms", self.latency_scale_ms)?;
        require_positive("cost.compute_cost_scale", self.compute_cost_scale)?;
        require_positive("cost.energy_cost_scale", self.energy_cost_scale)?;
        require_positive("cost.throughput_scale", self.throughput_scale)
    }

    /// Raw physical estimates for running `process` on `target` with
    /// `capacity_need` cores
    pub fn estimate(
        &self,
        process: &Process,
        target: &ExecutionTarget,
        capacity_need: f64,
    ) -> PlacementEstimate {
        let proximity = process
            .data_location
            .as_ref()
            .map(|data| data.proximity(&target.location));

        let transfer_gb = process.data_size_gb();
        let pair_price = self
            .transfer
            .price(proximity.unwrap_or(Proximity::SameLocation));
        let transfer_cost = transfer_gb * (pair_price + target.network.cost_per_gb);
        let transfer_ms = process.io_size_mb * 8.0 / target.network.bandwidth_mbps * 1000.0;

        let contention = 1.0 + target.current_load;
        let compute_ms = self.reference_runtime_ms / target.processing_speed * contention;
        let runtime_hours = compute_ms / MS_PER_HOUR;

        let projected_utilization = if target.total_capacity > 0.0 {
            ((target.total_capacity - target.available_capacity + capacity_need)
                / target.total_capacity)
                .clamp(0.0, 1.0)
        } else {
            1.0
        };

        PlacementEstimate {
            proximity,
            transfer_gb,
            transfer_cost,
            transfer_ms,
            compute_ms,
            completion_ms: target.network.latency_ms + transfer_ms + compute_ms,
            compute_cost: capacity_need * target.compute_cost_per_core_hour * runtime_hours,
            energy_cost: capacity_need
                * target.energy_kwh_per_core_hour
                * runtime_hours
                * self.energy_price_per_kwh,
            projected_utilization,
        }
    }
}

/// Physical quantities behind the normalized costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementEstimate {
    /// Proximity of the process data to the target; `None` without a data location
    pub proximity: Option<Proximity>,
    pub transfer_gb: f64,
    pub transfer_cost: f64,
    pub transfer_ms: f64,
    pub compute_ms: f64,
    pub completion_ms: f64,
    pub compute_cost: f64,
    pub energy_cost: f64,
    /// Target utilization after adding the capacity need
    pub projected_utilization: f64,
}

/// Inputs shared by every cost model for one target
pub struct CostContext<'a> {
    pub process: &'a Process,
    pub target: &'a ExecutionTarget,
    pub state: &'a SystemState,
    pub capacity_need: f64,
    pub estimate: &'a PlacementEstimate,
}

pub trait CostModel: Send + Sync {
    fn objective(&self) -> ObjectiveKind;

    /// Normalized cost in [0, 1]
    fn cost(&self, ctx: &CostContext<'_>) -> f64;
}

/// `x / (x + scale)` for non-negative `x`
pub fn saturate(x: f64, scale: f64) -> f64 {
    let x = x.max(0.0);
    if x == 0.0 {
        0.0
    } else {
        x / (x + scale)
    }
}

struct QueueDepthCost {
    scale: f64,
}

impl CostModel for QueueDepthCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::QueueDepth
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        let pressure = saturate(ctx.state.queue_depth, self.scale);
        ctx.estimate.projected_utilization * (1.0 + pressure) / 2.0
    }
}

struct LoadBalanceCost;

impl CostModel for LoadBalanceCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::LoadBalance
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        (ctx.estimate.projected_utilization - ctx.state.compute_usage).abs()
    }
}

struct NetworkCost {
    scale: f64,
}

impl CostModel for NetworkCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::NetworkCost
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        saturate(ctx.estimate.transfer_cost, self.scale)
    }
}

struct LatencyCost {
    scale_ms: f64,
}

impl CostModel for LatencyCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::Latency
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        saturate(ctx.estimate.completion_ms, self.scale_ms)
    }
}

struct EnergyCost {
    scale: f64,
}

impl CostModel for EnergyCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::Energy
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        saturate(ctx.estimate.energy_cost, self.scale)
    }
}

struct DataLocalityCost;

impl CostModel for DataLocalityCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::DataLocality
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        ctx.estimate.proximity.map_or(0.0, |p| 1.0 - p.factor())
    }
}

struct ComputeCost {
    scale: f64,
}

impl CostModel for ComputeCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::ComputeCost
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        // The estimate already carries the contention factor via runtime
        saturate(ctx.estimate.compute_cost, self.scale)
    }
}

/// Effective capacity the target can still deliver; usually maximized
struct ThroughputCost {
    scale: f64,
}

impl CostModel for ThroughputCost {
    fn objective(&self) -> ObjectiveKind {
        ObjectiveKind::Throughput
    }

    fn cost(&self, ctx: &CostContext<'_>) -> f64 {
        let t = ctx.target;
        saturate(
            t.available_capacity * t.processing_speed * t.reliability,
            self.scale,
        )
    }
}

/// One model per objective kind
pub struct CostModelSet {
    models: BTreeMap<ObjectiveKind, Box<dyn CostModel>>,
}

impl CostModelSet {
    pub fn standard(params: &CostParameters) -> Self {
        let models: Vec<Box<dyn CostModel>> = vec![
            Box::new(QueueDepthCost {
                scale: params.queue_depth_scale,
            }),
            Box::new(LoadBalanceCost),
            Box::new(NetworkCost {
                scale: params.network_cost_scale,
            }),
            Box::new(LatencyCost {
                scale_ms: params.latency_scale_ms,
            }),
            Box::new(EnergyCost {
                scale: params.energy_cost_scale,
            }),
            Box::new(DataLocalityCost),
            Box::new(ComputeCost {
                scale: params.compute_cost_scale,
            }),
            Box::new(ThroughputCost {
                scale: params.throughput_scale,
            }),
        ];
        Self {
            models: models.into_iter().map(|m| (m.objective(), m)).collect(),
        }
    }

    /// Swap in a custom model for its objective
    pub fn replace(&mut self, model: Box<dyn CostModel>) {
        self.models.insert(model.objective(), model);
    }

    /// Normalized cost for `objective`, clamped to [0, 1]. Non-finite model
    /// output counts as the worst cost.
    pub fn cost(&self, objective: ObjectiveKind, ctx: &CostContext<'_>) -> f64 {
        let raw = self
            .models
            .get(&objective)
            .map_or(1.0, |model| model.cost(ctx));
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}
