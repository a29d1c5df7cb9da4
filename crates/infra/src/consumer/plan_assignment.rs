//! The plan-assignment queue.
//!
//! Input contract: a JSON object carrying `idContrato` and
//! `idPlanAlimentario` (case-insensitive key aliases accepted). Decoded
//! messages become [`AssignPlan`] commands and go straight to the handler.

use vitalerp_contracts::AssignPlan;
use vitalerp_core::{ContractId, PlanId};
use vitalerp_events::{Delivery, Handles};

use super::parse::{decode_body, require_string};
use super::{ConsumerError, QueueBinding};

/// Queue name for inbound plan assignments.
pub const PLAN_ASSIGNMENT_QUEUE: &str = "plan-assignment";

pub struct PlanAssignmentBinding<H> {
    handler: H,
}

impl<H> PlanAssignmentBinding<H>
where
    H: Handles<AssignPlan>,
{
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H> QueueBinding for PlanAssignmentBinding<H>
where
    H: Handles<AssignPlan> + Send,
{
    fn queue(&self) -> &str {
        PLAN_ASSIGNMENT_QUEUE
    }

    /// Plan assignments ride on catering-contracted messages; deliveries
    /// without a routing key are accepted so hand-published messages still
    /// work.
    fn accepts(&self, delivery: &Delivery) -> bool {
        delivery
            .routing_key
            .as_deref()
            .is_none_or(|key| key.ends_with("catering.contracted"))
    }

    fn process(&self, delivery: &Delivery) -> Result<(), ConsumerError> {
        let body = decode_body(&delivery.body)?;
        let contract_id = require_string(&body, "idContrato")?;
        let plan_id = require_string(&body, "idPlanAlimentario")?;

        let command = AssignPlan {
            contract_id: ContractId::new(contract_id),
            plan_id: PlanId::new(plan_id),
        };

        self.handler
            .handle(command)
            .map_err(|err| ConsumerError::Handler(err.to_string()))
    }
}
