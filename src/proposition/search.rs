//! Query Engine: filtered retrieval, similarity search, and clustering.
//!
//! Every entry point returns a plain `Vec`. Backend failures are logged at
//! error level and yield an empty result, so callers cannot distinguish "no
//! matches" from "backend unavailable".

use std::collections::HashSet;

use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::{debug, error};

use super::query::{self, PropositionQuery, WhereBuilder};
use super::store::{load_by_ids, load_embeddings, query_propositions, PropositionStore};
use super::types::{Cluster, Proposition, SimilarityResult, TextSimilaritySearchRequest};
use crate::db::{self, schema};
use crate::embedding::embedding_to_bytes;

impl PropositionStore {
    /// Run a typed query: SQL predicates, then the decay threshold, then ordering.
    pub fn query(&self, query: &PropositionQuery) -> Vec<Proposition> {
        self.try_query(query).unwrap_or_else(|e| {
            error!(error = %e, "proposition query failed");
            Vec::new()
        })
    }

    fn try_query(&self, query: &PropositionQuery) -> Result<Vec<Proposition>> {
        let plan = query::compile(query);
        debug!(sql = %plan.sql, params = plan.params.len(), "executing proposition query");
        let conn = db::lock(self.connection())?;
        let found = query_propositions(&conn, &plan.sql, &plan.params)?;
        let found = query::apply_decay_threshold(found, query);
        Ok(query::apply_ordering(found, query))
    }

    /// Nearest neighbours of the request text, best first, above the threshold.
    pub fn find_similar_with_scores(&self, request: &TextSimilaritySearchRequest) -> Vec<SimilarityResult> {
        self.try_find_similar(request, None).unwrap_or_else(|e| {
            error!(query = %request.query, error = %e, "similarity search failed");
            Vec::new()
        })
    }

    /// Similarity search restricted to propositions matching `query`.
    ///
    /// The restricted set is ranked exactly rather than through the KNN index,
    /// so a narrow filter never starves the top-K.
    pub fn find_similar_with_scores_filtered(
        &self,
        request: &TextSimilaritySearchRequest,
        query: &PropositionQuery,
    ) -> Vec<SimilarityResult> {
        self.try_find_similar(request, Some(query)).unwrap_or_else(|e| {
            error!(query = %request.query, error = %e, "filtered similarity search failed");
            Vec::new()
        })
    }

    fn try_find_similar(
        &self,
        request: &TextSimilaritySearchRequest,
        filter: Option<&PropositionQuery>,
    ) -> Result<Vec<SimilarityResult>> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self
            .embedding_provider()
            .embed(&request.query)
            .context("failed to embed similarity query")?;

        let conn = db::lock(self.connection())?;
        let scored = match filter {
            None => knn(&conn, &embedding, request.top_k)?,
            Some(q) => filtered_scan(&conn, &embedding, request.top_k, q)?,
        };

        let scored: Vec<(String, f64)> = scored
            .into_iter()
            .filter(|(_, score)| *score >= request.similarity_threshold)
            .collect();
        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let mut propositions = load_by_ids(&conn, &ids)?;
        if let Some(q) = filter {
            propositions = query::apply_decay_threshold(propositions, q);
        }

        // load_by_ids preserves order but may skip rows deleted since the search
        let results = propositions
            .into_iter()
            .filter_map(|p| {
                scored
                    .iter()
                    .find(|(id, _)| id == &p.id)
                    .map(|(_, score)| SimilarityResult {
                        proposition: p,
                        score: *score,
                    })
            })
            .collect();
        Ok(results)
    }

    /// Group similar propositions around anchors.
    ///
    /// Candidates come from `query` (or every proposition). Anchors are taken
    /// in candidate order; each anchor collects up to `max_cluster_size`
    /// unassigned propositions scoring at least `threshold`. A proposition
    /// belongs to at most one cluster and anchors with no similar members are
    /// omitted.
    pub fn find_clusters(
        &self,
        threshold: f64,
        max_cluster_size: usize,
        query: Option<&PropositionQuery>,
    ) -> Vec<Cluster> {
        self.try_find_clusters(threshold, max_cluster_size, query)
            .unwrap_or_else(|e| {
                error!(error = %e, "clustering failed");
                Vec::new()
            })
    }

    fn try_find_clusters(
        &self,
        threshold: f64,
        max_cluster_size: usize,
        query: Option<&PropositionQuery>,
    ) -> Result<Vec<Cluster>> {
        let candidates = match query {
            Some(q) => self.try_query(q)?,
            None => self.find_all()?,
        };

        let mut embeddings = {
            let conn = db::lock(self.connection())?;
            load_embeddings(&conn)?
        };
        let mut propositions = Vec::with_capacity(candidates.len());
        let mut vectors = Vec::with_capacity(candidates.len());
        for p in candidates {
            if let Some(v) = embeddings.remove(&p.id) {
                vectors.push(v);
                propositions.push(p);
            }
        }
        debug!(candidates = propositions.len(), "clustering embedded propositions");

        Ok(cluster(propositions, &vectors, threshold, max_cluster_size))
    }
}

/// Largest `k` the vec0 index accepts in a KNN query.
const KNN_MAX_K: usize = 4096;

/// KNN over the vec0 index. Cosine distance is `1 - similarity`.
fn knn(conn: &Connection, embedding: &[f32], top_k: usize) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, distance FROM {} WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance",
        schema::VECTOR_INDEX_TABLE
    ))?;
    let k = i64::try_from(top_k.min(KNN_MAX_K)).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![embedding_to_bytes(embedding), k], |row| {
            Ok((row.get::<_, String>(0)?, 1.0 - row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Exact cosine ranking over the rows matching `query`'s SQL predicates.
fn filtered_scan(
    conn: &Connection,
    embedding: &[f32],
    top_k: usize,
    query: &PropositionQuery,
) -> Result<Vec<(String, f64)>> {
    let mut builder = WhereBuilder::after(vec![Value::Blob(embedding_to_bytes(embedding))]);
    query::push_filters(query, &mut builder);
    let clause = builder.clause();
    let mut params = builder.into_params();
    params.push(Value::Integer(i64::try_from(top_k).unwrap_or(i64::MAX)));

    let sql = format!(
        "SELECT p.id, vec_distance_cosine(v.embedding, ?1) AS distance \
         FROM propositions p JOIN {} v ON v.id = p.id \
         WHERE {clause} ORDER BY distance, p.id LIMIT ?{}",
        schema::VECTOR_INDEX_TABLE,
        params.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, 1.0 - row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Anchor-greedy grouping by cosine similarity, one anchor row at a time.
fn cluster(
    propositions: Vec<Proposition>,
    vectors: &[Vec<f32>],
    threshold: f64,
    max_cluster_size: usize,
) -> Vec<Cluster> {
    let n = propositions.len();
    let Some(dims) = vectors.first().map(Vec::len) else {
        return Vec::new();
    };
    if max_cluster_size == 0 || vectors.iter().any(|v| v.len() != dims) {
        return Vec::new();
    }

    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let Ok(mut matrix) = Array2::from_shape_vec((n, dims), flat) else {
        return Vec::new();
    };
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|x| x / norm);
        }
    }
    let mut assigned: HashSet<usize> = HashSet::new();
    let mut groups: Vec<(usize, Vec<(usize, f64)>)> = Vec::new();
    for anchor in 0..n {
        if assigned.contains(&anchor) {
            continue;
        }
        let similarity = matrix.dot(&matrix.row(anchor));
        let mut members: Vec<(usize, f64)> = (0..n)
            .filter(|&j| j != anchor && !assigned.contains(&j))
            .map(|j| (j, similarity[j] as f64))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        if members.is_empty() {
            continue;
        }
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        members.truncate(max_cluster_size);

        assigned.insert(anchor);
        assigned.extend(members.iter().map(|(j, _)| *j));
        groups.push((anchor, members));
    }

    let mut slots: Vec<Option<Proposition>> = propositions.into_iter().map(Some).collect();
    groups
        .into_iter()
        .filter_map(|(anchor, members)| {
            let anchor = slots[anchor].take()?;
            let similar = members
                .into_iter()
                .filter_map(|(j, score)| {
                    slots[j].take().map(|proposition| SimilarityResult { proposition, score })
                })
                .collect();
            Some(Cluster { anchor, similar })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposition::query::OrderBy;
    use crate::proposition::test_support::test_store;
    use crate::proposition::types::PropositionStatus;
    use chrono::{Duration, Utc};

    fn save(store: &PropositionStore, ctx: &str, text: &str) -> Proposition {
        let p = Proposition::new(ctx, text, 0.8);
        store.save(&p).unwrap();
        p
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let store = test_store();
        let mut low = Proposition::new("ctx", "low", 0.2);
        low.reinforce_count = 5;
        let mut high = Proposition::new("ctx", "high", 0.9);
        high.reinforce_count = 1;
        store.save(&low).unwrap();
        store.save(&high).unwrap();
        save(&store, "elsewhere", "other context");

        let by_confidence = store.query(
            &PropositionQuery::for_context("ctx").ordered_by(OrderBy::EffectiveConfidenceDesc),
        );
        assert_eq!(by_confidence.iter().map(|p| p.text.as_str()).collect::<Vec<_>>(), ["high", "low"]);

        let by_reinforcement = store.query(
            &PropositionQuery::for_context("ctx")
                .ordered_by(OrderBy::ReinforceCountDesc)
                .limit(1),
        );
        assert_eq!(by_reinforcement.len(), 1);
        assert_eq!(by_reinforcement[0].text, "low");

        let none = store.query(&PropositionQuery::new().with_status(PropositionStatus::Contradicted));
        assert!(none.is_empty());
    }

    #[test]
    fn limit_is_applied_before_decay_threshold() {
        let store = test_store();
        let mut stale = Proposition::new("ctx", "stale but confident", 0.99);
        stale.created = Utc::now() - Duration::days(3000);
        stale.revised = stale.created;
        store.save(&stale).unwrap();
        save(&store, "ctx", "fresh but less confident");

        let query = PropositionQuery::for_context("ctx")
            .min_effective_confidence(0.5, None, 1.0)
            .ordered_by(OrderBy::EffectiveConfidenceDesc)
            .limit(1);
        // SQL picks the stale row by raw confidence, then the decay stage drops it
        assert!(store.query(&query).is_empty());
    }

    #[test]
    fn similarity_search_ranks_by_score() {
        let store = test_store();
        save(&store, "ctx", "the user enjoys mountain hiking");
        save(&store, "ctx", "the user enjoys hiking");
        save(&store, "ctx", "quarterly tax filing deadline");

        let results = store.find_similar_with_scores(&TextSimilaritySearchRequest::new("enjoys hiking", 10, 0.3));
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert!(results.iter().all(|r| r.proposition.text.contains("hiking")));
    }

    #[test]
    fn unbounded_top_k_still_returns_matches() {
        let store = test_store();
        let hiking = save(&store, "ctx", "the user enjoys hiking");
        save(&store, "ctx", "quarterly tax filing deadline");

        let request = TextSimilaritySearchRequest::new("enjoys hiking", usize::MAX, 0.3);
        let unfiltered = store.find_similar_with_scores(&request);
        assert_eq!(unfiltered.len(), 1);
        assert_eq!(unfiltered[0].proposition.id, hiking.id);

        let filtered = store.find_similar_with_scores_filtered(&request, &PropositionQuery::for_context("ctx"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].proposition.id, hiking.id);
    }

    #[test]
    fn filtered_similarity_respects_context() {
        let store = test_store();
        save(&store, "a", "the user enjoys hiking");
        let in_b = save(&store, "b", "the user enjoys hiking trips");

        let results = store.find_similar_with_scores_filtered(
            &TextSimilaritySearchRequest::new("enjoys hiking", 5, 0.0),
            &PropositionQuery::for_context("b"),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].proposition.id, in_b.id);
    }

    #[test]
    fn clusters_group_similar_and_omit_singletons() {
        let store = test_store();
        save(&store, "ctx", "user likes green tea");
        save(&store, "ctx", "user likes green tea a lot");
        save(&store, "ctx", "user likes green tea daily");
        save(&store, "ctx", "rocket engines burn kerosene");

        let clusters = store.find_clusters(0.6, 10, Some(&PropositionQuery::for_context("ctx")));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
        assert!(clusters[0].similar.windows(2).all(|w| w[0].score >= w[1].score));

        let capped = store.find_clusters(0.6, 1, None);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].similar.len(), 1);

        let mut seen = HashSet::new();
        for c in store.find_clusters(0.0, 10, None) {
            assert!(seen.insert(c.anchor.id.clone()));
            for s in c.similar {
                assert!(seen.insert(s.proposition.id));
            }
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f64 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        (dot / (na * nb)) as f64
    }

    #[test]
    fn clusters_match_pairwise_cosine_greedy() {
        let vectors: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.8, 0.3, 0.1],
            vec![0.1, 0.9, 0.2],
            vec![0.0, 0.0, 1.0],
        ];
        let propositions: Vec<Proposition> = (0..vectors.len())
            .map(|i| Proposition::new("ctx", &format!("p{i}"), 0.5))
            .collect();
        let ids: Vec<String> = propositions.iter().map(|p| p.id.clone()).collect();
        let (threshold, max) = (0.8, 2);

        let mut assigned = HashSet::new();
        let mut expected = Vec::new();
        for a in 0..vectors.len() {
            if assigned.contains(&a) {
                continue;
            }
            let mut members: Vec<(usize, f64)> = (0..vectors.len())
                .filter(|&j| j != a && !assigned.contains(&j))
                .map(|j| (j, cosine(&vectors[a], &vectors[j])))
                .filter(|(_, score)| *score >= threshold)
                .collect();
            if members.is_empty() {
                continue;
            }
            members.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
            members.truncate(max);
            assigned.insert(a);
            assigned.extend(members.iter().map(|(j, _)| *j));
            expected.push((a, members));
        }

        let clusters = cluster(propositions, &vectors, threshold, max);
        assert_eq!(clusters.len(), expected.len());
        for (c, (a, members)) in clusters.iter().zip(&expected) {
            assert_eq!(c.anchor.id, ids[*a]);
            assert_eq!(c.similar.len(), members.len());
            for (s, (j, score)) in c.similar.iter().zip(members) {
                assert_eq!(s.proposition.id, ids[*j]);
                assert!((s.score - score).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn similarity_without_index_degrades_to_empty() {
        let store = test_store();
        {
            let conn = db::lock(store.connection()).unwrap();
            conn.execute_batch(&format!("DROP TABLE {}", schema::VECTOR_INDEX_TABLE))
                .unwrap();
        }
        let results = store.find_similar_with_scores(&TextSimilaritySearchRequest::new("x", 5, 0.0));
        assert!(results.is_empty());
    }
}
