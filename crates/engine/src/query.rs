//! Test-query execution: live query, prediction, comparison.

use crate::sim::Simulation;
use crate::{EngineError, EngineResult};
use geosim_client::{activity_search, profile_search};
use geosim_predict::{
    compare_covered_servers, compare_result_sets, predict_activity_search,
    predict_profile_search, ActivityQuery, ProfileQuery, WildcardFilter,
};
use geosim_scenario::{TestQuery, TestQueryActivity};
use geosim_wire::client::{ActivitySearchRequest, ProfileSearchRequest};
use prost::Message;
use tracing::{debug, info};

/// Live maxima mirrored from the client driver.
const PROFILE_MAX_TOTAL_WITH_IMAGES: usize = 1000;
const PROFILE_MAX_TOTAL_NO_IMAGES: usize = 10_000;
const ACTIVITY_MAX_TOTAL: usize = 10_000;

impl Simulation {
    pub(crate) async fn test_query(&mut self, query: &TestQuery) -> EngineResult<()> {
        let targets = self.world.resolve_servers(
            &query.servers.group,
            query.servers.index,
            query.servers.count,
        )?;

        for target in targets {
            let (initialized, port, target_id) = {
                let record = self.world.server(&target)?;
                let inner = record.shared.lock();
                (
                    inner.is_initialized(),
                    inner.client_port(),
                    inner
                        .network_id()
                        .map(|id| id.as_bytes().to_vec())
                        .unwrap_or_default(),
                )
            };
            if !initialized {
                self.queries_skipped += 1;
                info!(server = %target, "test query skipped: server not initialized");
                continue;
            }

            let neighbors = self
                .runtime
                .get(&target)
                .map(|runtime| runtime.loc.neighbor_names())
                .unwrap_or_default();

            let prediction = ProfileQuery {
                name_filter: WildcardFilter::parse(&query.name_filter),
                type_filter: WildcardFilter::parse(&query.type_filter),
                location: query.location,
                radius: query.radius,
                include_hosted_only: false,
                include_images: query.include_images,
            };
            let expected = predict_profile_search(&self.world, &target, &neighbors, &prediction)?;

            let request = ProfileSearchRequest {
                include_hosted_only: false,
                include_images: query.include_images,
                name_filter: query.name_filter.clone(),
                type_filter: query.type_filter.clone(),
                has_location: query.location.is_some(),
                latitude: query.location.map(|l| l.latitude).unwrap_or_default(),
                longitude: query.location.map(|l| l.longitude).unwrap_or_default(),
                radius: query.radius,
                max_response_record_count: 0,
                max_total_record_count: 0,
            };
            let outcome = profile_search(port, request, &mut self.rng).await?;

            let max_total = if query.include_images {
                PROFILE_MAX_TOTAL_WITH_IMAGES
            } else {
                PROFILE_MAX_TOTAL_NO_IMAGES
            };

            info!(
                server = %target,
                expected = expected.results.len(),
                got = outcome.results.len(),
                "comparing profile query results"
            );
            if let Err(source) =
                compare_result_sets(&expected.results, &outcome.results, max_total)
            {
                self.log_result_sets(&target, &expected.results, &outcome.results);
                return Err(EngineError::QueryMismatch {
                    server: target,
                    source,
                });
            }
            if let Err(source) = compare_covered_servers(
                &expected.covered_servers,
                &outcome.covered_servers,
                max_total,
                expected.local_count,
                &target_id,
            ) {
                self.log_covered_sets(&target, &expected.covered_servers, &outcome.covered_servers);
                return Err(EngineError::QueryMismatch {
                    server: target,
                    source,
                });
            }
        }
        Ok(())
    }

    pub(crate) async fn test_query_activity(
        &mut self,
        query: &TestQueryActivity,
    ) -> EngineResult<()> {
        let targets = self.world.resolve_servers(
            &query.servers.group,
            query.servers.index,
            query.servers.count,
        )?;

        for target in targets {
            let (initialized, port, target_id) = {
                let record = self.world.server(&target)?;
                let inner = record.shared.lock();
                (
                    inner.is_initialized(),
                    inner.client_port(),
                    inner
                        .network_id()
                        .map(|id| id.as_bytes().to_vec())
                        .unwrap_or_default(),
                )
            };
            if !initialized {
                self.queries_skipped += 1;
                info!(server = %target, "activity query skipped: server not initialized");
                continue;
            }

            let neighbors = self
                .runtime
                .get(&target)
                .map(|runtime| runtime.loc.neighbor_names())
                .unwrap_or_default();

            let prediction = ActivityQuery {
                type_filter: WildcardFilter::parse(&query.type_filter),
                start_not_after: query.start_not_after,
                expiration_not_before: query.expiration_not_before,
                location: query.location,
                radius: query.radius,
                include_primary_only: false,
            };
            let expected =
                predict_activity_search(&self.world, &target, &neighbors, &prediction)?;

            let request = ActivitySearchRequest {
                include_primary_only: false,
                type_filter: query.type_filter.clone(),
                has_start_not_after: query.start_not_after.is_some(),
                start_not_after: query.start_not_after.unwrap_or_default(),
                has_expiration_not_before: query.expiration_not_before.is_some(),
                expiration_not_before: query.expiration_not_before.unwrap_or_default(),
                has_location: query.location.is_some(),
                latitude: query.location.map(|l| l.latitude).unwrap_or_default(),
                longitude: query.location.map(|l| l.longitude).unwrap_or_default(),
                radius: query.radius,
                max_response_record_count: 0,
                max_total_record_count: 0,
            };
            let outcome = activity_search(port, request, &mut self.rng).await?;

            info!(
                server = %target,
                expected = expected.results.len(),
                got = outcome.results.len(),
                "comparing activity query results"
            );
            if let Err(source) =
                compare_result_sets(&expected.results, &outcome.results, ACTIVITY_MAX_TOTAL)
            {
                self.log_result_sets(&target, &expected.results, &outcome.results);
                return Err(EngineError::QueryMismatch {
                    server: target,
                    source,
                });
            }
            if let Err(source) = compare_covered_servers(
                &expected.covered_servers,
                &outcome.covered_servers,
                ACTIVITY_MAX_TOTAL,
                expected.local_count,
                &target_id,
            ) {
                self.log_covered_sets(&target, &expected.covered_servers, &outcome.covered_servers);
                return Err(EngineError::QueryMismatch {
                    server: target,
                    source,
                });
            }
        }
        Ok(())
    }

    /// In debug mode, dump both record sets of a failed comparison.
    fn log_result_sets<M: Message>(&self, target: &str, expected: &[M], real: &[M]) {
        if !self.debug {
            return;
        }
        for (i, record) in expected.iter().enumerate() {
            debug!(
                server = %target,
                "expected[{i}]: {}",
                hex::encode(record.encode_to_vec())
            );
        }
        for (i, record) in real.iter().enumerate() {
            debug!(
                server = %target,
                "real[{i}]: {}",
                hex::encode(record.encode_to_vec())
            );
        }
    }

    fn log_covered_sets(&self, target: &str, expected: &[Vec<u8>], real: &[Vec<u8>]) {
        if !self.debug {
            return;
        }
        for entry in expected {
            debug!(server = %target, "expected covered: {}", hex::encode(entry));
        }
        for entry in real {
            debug!(server = %target, "real covered: {}", hex::encode(entry));
        }
    }
}
