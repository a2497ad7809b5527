//! In-process store for tests and embedding.

use std::sync::{Mutex, MutexGuard, PoisonError};

use jiff::Timestamp;

use super::PlanStore;
use crate::{
    error::{PlanError, Result},
    models::{Context, ConvoMessage, ConvoMessageDescription, Plan, PlanFileResult, PlanStatus},
};

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    plans: Vec<Plan>,
    convo: Vec<ConvoMessage>,
    contexts: Vec<Context>,
    descriptions: Vec<ConvoMessageDescription>,
    results: Vec<PlanFileResult>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn plan_mut(&mut self, plan_id: u64) -> Result<&mut Plan> {
        self.plans
            .iter_mut()
            .find(|p| p.id == plan_id)
            .ok_or(PlanError::PlanNotFound { id: plan_id })
    }

    fn refresh_tokens(&mut self, plan_id: u64) -> Result<()> {
        let context_tokens = self
            .contexts
            .iter()
            .filter(|c| c.plan_id == plan_id)
            .map(|c| c.num_tokens)
            .sum();
        let convo_tokens = self
            .convo
            .iter()
            .filter(|m| m.plan_id == plan_id)
            .map(|m| m.tokens)
            .sum();
        let plan = self.plan_mut(plan_id)?;
        plan.context_tokens = context_tokens;
        plan.convo_tokens = convo_tokens;
        plan.updated_at = Timestamp::now();
        Ok(())
    }
}

/// Keeps every table in memory behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlanStore for MemoryStore {
    fn create_plan(&self, name: &str) -> Result<Plan> {
        let mut tables = self.tables();
        let now = Timestamp::now();
        let plan = Plan {
            id: tables.next_id(),
            name: name.to_string(),
            status: PlanStatus::Finished,
            error: None,
            context_tokens: 0,
            convo_tokens: 0,
            created_at: now,
            updated_at: now,
        };
        tables.plans.push(plan.clone());
        Ok(plan)
    }

    fn get_plan(&self, plan_id: u64) -> Result<Option<Plan>> {
        Ok(self.tables().plans.iter().find(|p| p.id == plan_id).cloned())
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.tables().plans.iter().rev().cloned().collect())
    }

    fn set_plan_status(&self, plan_id: u64, status: PlanStatus, error: Option<&str>) -> Result<()> {
        let mut tables = self.tables();
        let plan = tables.plan_mut(plan_id)?;
        plan.status = status;
        plan.error = error.map(str::to_string);
        plan.updated_at = Timestamp::now();
        Ok(())
    }

    fn store_convo_message(&self, message: &ConvoMessage) -> Result<ConvoMessage> {
        let mut tables = self.tables();
        tables.plan_mut(message.plan_id)?;
        if tables
            .convo
            .iter()
            .any(|m| m.plan_id == message.plan_id && m.num == message.num)
        {
            return Err(PlanError::invalid_input("num")
                .with_reason(format!("message {} already stored", message.num)));
        }
        let stored = ConvoMessage {
            id: tables.next_id(),
            ..message.clone()
        };
        tables.convo.push(stored.clone());
        tables.refresh_tokens(message.plan_id)?;
        Ok(stored)
    }

    fn get_plan_convo(&self, plan_id: u64) -> Result<Vec<ConvoMessage>> {
        let mut convo: Vec<ConvoMessage> = self
            .tables()
            .convo
            .iter()
            .filter(|m| m.plan_id == plan_id)
            .cloned()
            .collect();
        convo.sort_by_key(|m| m.num);
        Ok(convo)
    }

    fn store_context(&self, context: &Context) -> Result<Context> {
        let mut tables = self.tables();
        tables.plan_mut(context.plan_id)?;
        let existing = tables.contexts.iter().position(|c| {
            c.plan_id == context.plan_id && c.file_path.is_some() && c.file_path == context.file_path
        });
        let stored = match existing {
            Some(idx) => {
                let slot = &mut tables.contexts[idx];
                *slot = Context {
                    id: slot.id,
                    created_at: slot.created_at,
                    ..context.clone()
                };
                slot.clone()
            }
            None => {
                let stored = Context {
                    id: tables.next_id(),
                    ..context.clone()
                };
                tables.contexts.push(stored.clone());
                stored
            }
        };
        tables.refresh_tokens(context.plan_id)?;
        Ok(stored)
    }

    fn get_plan_contexts(&self, plan_id: u64) -> Result<Vec<Context>> {
        Ok(self
            .tables()
            .contexts
            .iter()
            .filter(|c| c.plan_id == plan_id)
            .cloned()
            .collect())
    }

    fn store_description(&self, description: &ConvoMessageDescription) -> Result<ConvoMessageDescription> {
        let mut tables = self.tables();
        let stored = ConvoMessageDescription {
            id: tables.next_id(),
            ..description.clone()
        };
        tables.descriptions.push(stored.clone());
        Ok(stored)
    }

    fn store_plan_file_result(&self, result: &PlanFileResult) -> Result<PlanFileResult> {
        let mut tables = self.tables();
        let mut stored = PlanFileResult {
            id: tables.next_id(),
            created_at: Some(result.created_at.unwrap_or_else(Timestamp::now)),
            ..result.clone()
        };
        for replacement in &mut stored.replacements {
            replacement.id = tables.next_id();
        }
        tables.results.push(stored.clone());
        Ok(stored)
    }

    fn get_plan_file_results(&self, plan_id: u64) -> Result<Vec<PlanFileResult>> {
        Ok(self
            .tables()
            .results
            .iter()
            .filter(|r| r.plan_id == plan_id)
            .cloned()
            .collect())
    }

    fn mark_results_applied(&self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        let mut tables = self.tables();
        let mut updated = 0;
        for result in &mut tables.results {
            if result_ids.contains(&result.id) && result.applied_at.is_none() {
                result.applied_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn reject_results(&self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        let mut tables = self.tables();
        let mut updated = 0;
        for result in &mut tables.results {
            if !result_ids.contains(&result.id)
                || result.applied_at.is_some()
                || result.rejected_at.is_some()
            {
                continue;
            }
            result.rejected_at = Some(at);
            for replacement in result.replacements.iter_mut().filter(|r| r.rejected_at.is_none()) {
                replacement.set_rejected(at);
            }
            updated += 1;
        }
        Ok(updated)
    }

    fn reject_replacement(&self, replacement_id: u64, at: Timestamp) -> Result<bool> {
        let mut tables = self.tables();
        let replacement = tables
            .results
            .iter_mut()
            .flat_map(|r| r.replacements.iter_mut())
            .find(|r| r.id == replacement_id && r.rejected_at.is_none());
        match replacement {
            Some(replacement) => {
                replacement.set_rejected(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
