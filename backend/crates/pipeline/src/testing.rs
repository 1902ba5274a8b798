//! In-memory source and target systems.
//!
//! Test support for the pipeline. Both are cheap to clone; clones share
//! state, so a test can keep a handle for inspection after passing one into
//! the pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::connector::{SourceSystem, TargetSystem};
use crate::lock;
use crate::record::{MaterialRecord, ProductRecord};
use crate::watermark::ExtractionWindow;
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

#[derive(Default)]
struct SourceState {
    products: Vec<ProductRecord>,
    next_id: u64,
    query_calls: usize,
    query_failure: Option<String>,
    delete_failure: Option<String>,
}

impl SourceState {
    fn assign_id(&mut self) -> String {
        self.next_id += 1;
        format!("01t{:012}", self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store products as-is, keeping their modification times. Missing ids are assigned.
    pub fn seed(&self, products: Vec<ProductRecord>) {
        let mut state = lock(&self.state);
        for mut product in products {
            if product.id.is_none() {
                product.id = Some(state.assign_id());
            }
            state.products.push(product);
        }
    }

    pub fn products(&self) -> Vec<ProductRecord> {
        lock(&self.state).products.clone()
    }

    pub fn query_calls(&self) -> usize {
        lock(&self.state).query_calls
    }

    pub fn fail_queries(&self, message: &str) {
        lock(&self.state).query_failure = Some(message.to_string());
    }

    pub fn fail_deletes(&self, message: &str) {
        lock(&self.state).delete_failure = Some(message.to_string());
    }
}

#[async_trait]
impl SourceSystem for InMemorySource {
    fn system_name(&self) -> &str {
        "memory-source"
    }

    async fn create_products(
        &self,
        products: Vec<ProductRecord>,
    ) -> ProdsyncResult<Vec<ProductRecord>> {
        let mut state = lock(&self.state);
        let mut created = Vec::with_capacity(products.len());
        for mut product in products {
            product.id = Some(state.assign_id());
            product.last_modified = Some(Utc::now());
            state.products.push(product.clone());
            created.push(product);
        }
        Ok(created)
    }

    async fn query_modified(&self, window: &ExtractionWindow) -> ProdsyncResult<Vec<ProductRecord>> {
        let mut state = lock(&self.state);
        state.query_calls += 1;
        if let Some(message) = &state.query_failure {
            return Err(ProdsyncError::Source(message.clone()));
        }

        let mut matching: Vec<ProductRecord> = state
            .products
            .iter()
            .filter(|p| p.last_modified.is_some_and(|at| window.contains(at)))
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.last_modified);
        Ok(matching)
    }

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<ProductRecord>> {
        let state = lock(&self.state);
        if let Some(message) = &state.query_failure {
            return Err(ProdsyncError::Source(message.clone()));
        }
        Ok(state
            .products
            .iter()
            .filter(|p| p.name == name)
            .cloned()
            .collect())
    }

    async fn delete_products(&self, ids: &[String]) -> ProdsyncResult<usize> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.delete_failure {
            return Err(ProdsyncError::Source(message.clone()));
        }
        let before = state.products.len();
        state
            .products
            .retain(|p| !p.id.as_ref().is_some_and(|id| ids.contains(id)));
        Ok(before - state.products.len())
    }
}

#[derive(Default)]
struct TargetState {
    materials: Vec<MaterialRecord>,
    next_number: u64,
    upserts: usize,
    rejected_names: HashSet<String>,
    hidden_lookups: u32,
    delete_failure: Option<String>,
    upsert_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct InMemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn materials(&self) -> Vec<MaterialRecord> {
        lock(&self.state).materials.clone()
    }

    pub fn upserts(&self) -> usize {
        lock(&self.state).upserts
    }

    /// Upserts of a material with this name fail.
    pub fn reject_name(&self, name: &str) {
        lock(&self.state).rejected_names.insert(name.to_string());
    }

    pub fn accept_name(&self, name: &str) {
        lock(&self.state).rejected_names.remove(name);
    }

    /// Every upsert sleeps this long before touching the store.
    pub fn delay_upserts(&self, delay: Duration) {
        lock(&self.state).upsert_delay = Some(delay);
    }

    /// The next `lookups` calls to `find_by_name` see nothing, like a
    /// replica that has not caught up yet.
    pub fn hide_for_lookups(&self, lookups: u32) {
        lock(&self.state).hidden_lookups = lookups;
    }

    pub fn fail_deletes(&self, message: &str) {
        lock(&self.state).delete_failure = Some(message.to_string());
    }
}

#[async_trait]
impl TargetSystem for InMemoryTarget {
    fn system_name(&self) -> &str {
        "memory-target"
    }

    async fn upsert_material(&self, material: &MaterialRecord) -> ProdsyncResult<String> {
        let delay = lock(&self.state).upsert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.upserts += 1;
        if state.rejected_names.contains(&material.name) {
            return Err(ProdsyncError::Target(format!(
                "material '{}' rejected",
                material.name
            )));
        }

        if let Some(existing) = state.materials.iter_mut().find(|m| m.name == material.name) {
            let number = existing.material_number.clone();
            *existing = MaterialRecord {
                material_number: number.clone(),
                ..material.clone()
            };
            return number.ok_or_else(|| {
                ProdsyncError::Internal(format!("material '{}' has no number", material.name))
            });
        }

        state.next_number += 1;
        let number = format!("MAT{:08}", state.next_number);
        state.materials.push(MaterialRecord {
            material_number: Some(number.clone()),
            ..material.clone()
        });
        Ok(number)
    }

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<MaterialRecord>> {
        let mut state = lock(&self.state);
        if state.hidden_lookups > 0 {
            state.hidden_lookups -= 1;
            return Ok(Vec::new());
        }
        Ok(state
            .materials
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect())
    }

    async fn delete_by_name(&self, name: &str) -> ProdsyncResult<usize> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.delete_failure {
            return Err(ProdsyncError::Target(message.clone()));
        }
        let before = state.materials.len();
        state.materials.retain(|m| m.name != name);
        Ok(before - state.materials.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_assigns_ids_and_modification_times() {
        let source = InMemorySource::new();
        let created = source
            .create_products(vec![ProductRecord::named("A"), ProductRecord::named("B")])
            .await
            .unwrap();

        assert_eq!(created[0].id.as_deref(), Some("01t000000000001"));
        assert_eq!(created[1].id.as_deref(), Some("01t000000000002"));
        assert!(created.iter().all(|p| p.last_modified.is_some()));

        let deleted = source
            .delete_products(&["01t000000000001".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(source.products().len(), 1);
    }

    #[tokio::test]
    async fn source_query_honours_window() {
        let now = Utc::now();
        let source = InMemorySource::new();
        source.seed(vec![
            ProductRecord {
                last_modified: Some(now - chrono::Duration::seconds(30)),
                ..ProductRecord::named("in")
            },
            ProductRecord {
                last_modified: Some(now),
                ..ProductRecord::named("out")
            },
        ]);

        let window = ExtractionWindow {
            from: now - chrono::Duration::seconds(60),
            until: now,
        };
        let found = source.query_modified(&window).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "in");
        assert_eq!(source.query_calls(), 1);
    }

    #[tokio::test]
    async fn target_upsert_matches_by_name() {
        let target = InMemoryTarget::new();
        let mut material = MaterialRecord::from(&ProductRecord::named("Widget"));

        let first = target.upsert_material(&material).await.unwrap();
        material.description = Some("updated".to_string());
        let second = target.upsert_material(&material).await.unwrap();

        assert_eq!(first, second);
        let stored = target.materials();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].description.as_deref(), Some("updated"));
        assert_eq!(target.upserts(), 2);
    }

    #[tokio::test]
    async fn target_hides_records_for_requested_lookups() {
        let target = InMemoryTarget::new();
        target
            .upsert_material(&MaterialRecord::from(&ProductRecord::named("Lagging")))
            .await
            .unwrap();
        target.hide_for_lookups(1);

        assert!(target.find_by_name("Lagging").await.unwrap().is_empty());
        assert_eq!(target.find_by_name("Lagging").await.unwrap().len(), 1);
    }
}
