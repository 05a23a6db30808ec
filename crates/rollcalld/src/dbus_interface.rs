use crate::engine::{EngineError, EngineHandle};
use crate::preview::PreviewReader;
use chrono::{Local, NaiveDate};
use rollcall_core::{AttendanceLedger, EmbeddingStore, LedgerError};
use std::sync::Arc;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured replies are JSON strings.
pub struct AttendanceService {
    engine: EngineHandle,
    ledger: Arc<AttendanceLedger>,
    store: Arc<EmbeddingStore>,
    preview: PreviewReader,
    threshold: f32,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        ledger: Arc<AttendanceLedger>,
        store: Arc<EmbeddingStore>,
        preview: PreviewReader,
        threshold: f32,
    ) -> Self {
        Self {
            engine,
            ledger,
            store,
            preview,
            threshold,
        }
    }

    async fn with_ledger<T, F>(&self, f: F) -> fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&AttendanceLedger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| fdo::Error::Failed(format!("ledger task panicked: {e}")))?
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Detect and identify every face in an encoded image (JPEG, PNG, ...)
    /// and record newly present identities. Returns a JSON frame report.
    async fn submit_image(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "submit_image requested");
        let report = self.engine.submit_image(image).await.map_err(to_fdo)?;
        to_json(&report)
    }

    /// Identify a precomputed embedding and record it if new today.
    async fn submit_embedding(&self, values: Vec<f64>) -> fdo::Result<String> {
        tracing::info!(dimensions = values.len(), "submit_embedding requested");
        let values = values.into_iter().map(|v| v as f32).collect();
        let observation = self.engine.submit_embedding(values).await.map_err(to_fdo)?;
        to_json(&observation)
    }

    /// Ledger rows for `date` (YYYY-MM-DD), or every row when `date` is empty.
    async fn attendance(&self, date: &str) -> fdo::Result<String> {
        let records = if date.is_empty() {
            self.with_ledger(|l| l.records()).await?
        } else {
            let day = parse_date(date)?;
            self.with_ledger(move |l| l.records_on(day)).await?
        };
        to_json(&records)
    }

    /// The whole ledger as CSV text.
    async fn export_csv(&self) -> fdo::Result<String> {
        let bytes = self
            .with_ledger(|l| {
                let mut buf = Vec::new();
                l.export(&mut buf)?;
                Ok(buf)
            })
            .await?;
        String::from_utf8(bytes).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Number of identities recorded today.
    async fn count_today(&self) -> fdo::Result<u32> {
        let count = self.with_ledger(|l| l.count_today()).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// JPEG of the most recently processed image with face boxes drawn,
    /// or an empty array before the first image.
    async fn latest_frame(&self) -> Vec<u8> {
        self.preview
            .latest()
            .map(|jpeg| jpeg.as_ref().clone())
            .unwrap_or_default()
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let store = &self.store;
        let today = self.with_ledger(|l| l.count_today()).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model": store.model(),
            "dimensions": store.dimensions(),
            "identities": store.len(),
            "threshold": self.threshold,
            "ledger": self.ledger.path(),
            "recorded_today": today,
            "date": Local::now().date_naive().to_string(),
        })
        .to_string())
    }

    /// Enrolled identity names, sorted.
    async fn list_identities(&self) -> fdo::Result<String> {
        let names: Vec<&str> = self.store.names().collect();
        to_json(&names)
    }
}

fn parse_date(date: &str) -> fdo::Result<NaiveDate> {
    date.parse()
        .map_err(|_| fdo::Error::InvalidArgs(format!("expected YYYY-MM-DD, got {date:?}")))
}

fn to_fdo(err: EngineError) -> fdo::Error {
    match err {
        EngineError::InvalidImage(_) | EngineError::DimensionMismatch(_) => {
            fdo::Error::InvalidArgs(err.to_string())
        }
        other => {
            tracing::error!(error = %other, "request failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(matches!(parse_date("03/01/2024"), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_client_errors_map_to_invalid_args() {
        let bad = image::load_from_memory(b"nope").unwrap_err();
        assert!(matches!(
            to_fdo(EngineError::InvalidImage(bad)),
            fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(to_fdo(EngineError::ChannelClosed), fdo::Error::Failed(_)));
    }
}
