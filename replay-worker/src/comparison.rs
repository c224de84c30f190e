use std::sync::Arc;

use bytes::Bytes;
use replay_common::document::{extract_response, prepare_request, ResponseFields};
use replay_common::record::{ComparisonRow, InputRecord};
use tracing::debug;

use crate::error::ComparisonError;
use crate::transport::{Endpoint, Transport};

/// Replays a recorded request against both endpoints and assembles the report row.
pub struct Comparer {
    transport: Arc<dyn Transport>,
    endpoint_a: Endpoint,
    endpoint_b: Endpoint,
}

impl Comparer {
    pub fn new(transport: Arc<dyn Transport>, endpoint_a: Endpoint, endpoint_b: Endpoint) -> Self {
        Self {
            transport,
            endpoint_a,
            endpoint_b,
        }
    }

    /// Compare a single record.
    ///
    /// Endpoint B receives exactly the body sent to endpoint A, and only after A has answered.
    /// The row carries A's jurisdictions and both tax totals.
    pub async fn compare(&self, record: &InputRecord) -> Result<ComparisonRow, ComparisonError> {
        let invoice = record.prefix.invoice.as_str();

        let prepared =
            prepare_request(&record.document).map_err(ComparisonError::PrepareError)?;
        debug!(invoice, line_count = prepared.line_count, "prepared request");

        let fields_a = self.calculate(&self.endpoint_a, prepared.body.clone()).await?;
        debug!(invoice, "received response from endpoint A");

        let fields_b = self.calculate(&self.endpoint_b, prepared.body).await?;
        debug!(invoice, "received response from endpoint B");

        Ok(ComparisonRow {
            prefix: record.prefix.clone(),
            line_count: prepared.line_count,
            jurisdictions: fields_a.jurisdictions,
            total_tax_a: fields_a.total_tax,
            total_tax_b: fields_b.total_tax,
        })
    }

    async fn calculate(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
    ) -> Result<ResponseFields, ComparisonError> {
        let response = self
            .transport
            .send(endpoint, body)
            .await
            .map_err(|error| ComparisonError::TransportError {
                side: endpoint.side,
                error,
            })?;

        extract_response(&response).map_err(|error| ComparisonError::ResponseError {
            side: endpoint.side,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Side, TransportError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use flate2::{write::GzEncoder, Compression};
    use replay_common::record::PrefixMetadata;
    use std::io::Write;
    use std::sync::Mutex;

    /// Answers with a fixed body per side and remembers what it was sent.
    struct RecordingTransport {
        response_a: &'static str,
        response_b: Result<&'static str, &'static str>,
        sent: Mutex<Vec<(Side, Bytes)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, endpoint: &Endpoint, body: Bytes) -> Result<Bytes, TransportError> {
            self.sent.lock().unwrap().push((endpoint.side, body));
            match endpoint.side {
                Side::A => Ok(Bytes::from_static(self.response_a.as_bytes())),
                Side::B => self
                    .response_b
                    .map(|response| Bytes::from_static(response.as_bytes()))
                    .map_err(|error| TransportError::OtherError(error.to_owned())),
            }
        }
    }

    fn endpoints() -> (Endpoint, Endpoint) {
        let a = "http://tax-a:8080".parse().unwrap();
        let b = "http://tax-b:8080".parse().unwrap();
        (
            Endpoint::new(Side::A, &a, "/sabrix/xmlinvoice", "/sabrix/taxproduct").unwrap(),
            Endpoint::new(Side::B, &b, "/sabrix/xmlinvoice", "/sabrix/taxproduct").unwrap(),
        )
    }

    fn record(document: &str) -> InputRecord {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(document.as_bytes()).unwrap();

        InputRecord {
            document: Bytes::from(encoder.finish().unwrap()),
            prefix: PrefixMetadata {
                captured_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
                original_date: NaiveDate::from_ymd_opt(2019, 6, 30).unwrap(),
                company: "DELTA".to_owned(),
                invoice: "INV-42".to_owned(),
            },
        }
    }

    fn comparer(transport: Arc<RecordingTransport>) -> Comparer {
        let (endpoint_a, endpoint_b) = endpoints();
        Comparer::new(transport, endpoint_a, endpoint_b)
    }

    const REQUEST: &str =
        "<REQUEST><IS_AUDITED>Y</IS_AUDITED><LINE><ID>1</ID></LINE><LINE><ID>2</ID></LINE></REQUEST>";

    #[tokio::test]
    async fn test_compare_assembles_row() {
        let transport = Arc::new(RecordingTransport {
            response_a: "<RESPONSE><TAXABLE_STATE>GA</TAXABLE_STATE><TOTAL_TAX_AMOUNT>5.00</TOTAL_TAX_AMOUNT></RESPONSE>",
            response_b: Ok("<RESPONSE><TAXABLE_STATE>FL</TAXABLE_STATE><TOTAL_TAX_AMOUNT>5.25</TOTAL_TAX_AMOUNT></RESPONSE>"),
            sent: Mutex::new(Vec::new()),
        });
        let record = record(REQUEST);

        let row = comparer(transport.clone())
            .compare(&record)
            .await
            .expect("comparison failed");

        assert_eq!(
            row,
            ComparisonRow {
                prefix: record.prefix.clone(),
                line_count: 2,
                jurisdictions: "GA".to_owned(),
                total_tax_a: Some("5.00".to_owned()),
                total_tax_b: Some("5.25".to_owned()),
            }
        );
    }

    #[tokio::test]
    async fn test_compare_sends_identical_body_to_a_then_b() {
        let transport = Arc::new(RecordingTransport {
            response_a: "<RESPONSE/>",
            response_b: Ok("<RESPONSE/>"),
            sent: Mutex::new(Vec::new()),
        });

        comparer(transport.clone())
            .compare(&record(REQUEST))
            .await
            .expect("comparison failed");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, Side::A);
        assert_eq!(sent[1].0, Side::B);
        assert_eq!(sent[0].1, sent[1].1);
        assert!(std::str::from_utf8(&sent[0].1)
            .unwrap()
            .contains("<IS_AUDITED>N</IS_AUDITED>"));
    }

    #[tokio::test]
    async fn test_compare_fails_on_malformed_request() {
        let transport = Arc::new(RecordingTransport {
            response_a: "<RESPONSE/>",
            response_b: Ok("<RESPONSE/>"),
            sent: Mutex::new(Vec::new()),
        });
        let mut record = record(REQUEST);
        record.document = Bytes::from_static(b"not gzip");

        let error = comparer(transport.clone())
            .compare(&record)
            .await
            .expect_err("comparison should fail");

        assert_eq!(error.stage(), "prepare");
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_fails_on_malformed_response() {
        let transport = Arc::new(RecordingTransport {
            response_a: "<RESPONSE>",
            response_b: Ok("<RESPONSE/>"),
            sent: Mutex::new(Vec::new()),
        });

        let error = comparer(transport.clone())
            .compare(&record(REQUEST))
            .await
            .expect_err("comparison should fail");

        assert!(matches!(
            error,
            ComparisonError::ResponseError { side: Side::A, .. }
        ));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_fails_on_transport_error() {
        let transport = Arc::new(RecordingTransport {
            response_a: "<RESPONSE/>",
            response_b: Err("connection reset"),
            sent: Mutex::new(Vec::new()),
        });

        let error = comparer(transport)
            .compare(&record(REQUEST))
            .await
            .expect_err("comparison should fail");

        assert_eq!(error.stage(), "send");
        assert!(matches!(
            error,
            ComparisonError::TransportError { side: Side::B, .. }
        ));
    }
}
