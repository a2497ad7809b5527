//! Registry of active plans, injected into the server rather than global.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;

use super::ActivePlan;
use crate::error::{PlanError, Result};

/// At most one [`ActivePlan`] per plan ID.
#[derive(Default)]
pub struct ActivePlans {
    plans: Mutex<HashMap<u64, Arc<ActivePlan>>>,
}

impl ActivePlans {
    pub fn new() -> Self {
        Self::default()
    }

    fn plans(&self) -> MutexGuard<'_, HashMap<u64, Arc<ActivePlan>>> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the plan built by `create` unless one is already live for
    /// `plan_id`. The check and insert happen under one lock, and `create`
    /// only runs when the slot is free.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::AlreadyActive` if the plan has a live execution.
    pub fn insert_new(
        &self,
        plan_id: u64,
        create: impl FnOnce() -> Arc<ActivePlan>,
    ) -> Result<Arc<ActivePlan>> {
        let mut plans = self.plans();
        if plans.contains_key(&plan_id) {
            return Err(PlanError::AlreadyActive { id: plan_id });
        }
        let plan = create();
        plans.insert(plan_id, Arc::clone(&plan));
        debug!("Plan {plan_id} activated");
        Ok(plan)
    }

    pub fn get(&self, plan_id: u64) -> Option<Arc<ActivePlan>> {
        self.plans().get(&plan_id).cloned()
    }

    /// Removes `plan` if it is still the registered instance for its ID.
    pub fn remove(&self, plan: &Arc<ActivePlan>) -> bool {
        let mut plans = self.plans();
        match plans.get(&plan.plan_id) {
            Some(current) if Arc::ptr_eq(current, plan) => {
                plans.remove(&plan.plan_id);
                debug!("Plan {} deactivated", plan.plan_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, plan_id: u64) -> bool {
        self.plans().contains_key(&plan_id)
    }

    pub fn len(&self) -> usize {
        self.plans().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans().is_empty()
    }
}
