// src/consistency.rs
//
// Read-after-write probe: PUT, GET, DELETE, GET against a fresh name, with
// byte-exact comparison of the read body. The whole probe yields a single
// outcome; the first deviation aborts it.

use reqwest::StatusCode;
use tracing::debug;

use crate::client::FileServerClient;
use crate::payload::{random_body, FileSizeState};

/// Verdict of one probe. The executor stamps the duration and file name
/// onto the final outcome.
#[derive(Debug)]
pub struct ProbeVerdict {
    pub status: Option<StatusCode>,
    pub failed: bool,
    pub message: String,
    pub error: Option<String>,
}

impl ProbeVerdict {
    fn fail(status: Option<StatusCode>, message: String, error: Option<String>) -> Self {
        Self {
            status,
            failed: true,
            message,
            error,
        }
    }

    fn transport(step: &str, err: &anyhow::Error) -> Self {
        Self::fail(
            None,
            format!("probe {step} failed in transport: {err:#}"),
            Some(format!("{err:#}")),
        )
    }
}

/// Run the 4-step probe for one file name.
pub async fn run_probe(
    client: &FileServerClient,
    sizes: &FileSizeState,
    file_name: &str,
) -> ProbeVerdict {
    let body = random_body(sizes.draw_size());

    // Step 1: write.
    let put = match client.put(file_name, body.clone()).await {
        Ok(x) => x,
        Err(err) => return ProbeVerdict::transport("PUT", &err),
    };
    if put.status != StatusCode::CREATED {
        return ProbeVerdict::fail(
            Some(put.status),
            format!("probe PUT returned {}, expected 201", put.status.as_u16()),
            None,
        );
    }

    // Step 2: read back immediately and compare byte-for-byte. This is the
    // property the whole probe exists for.
    let get = match client.get(file_name).await {
        Ok(x) => x,
        Err(err) => return ProbeVerdict::transport("GET", &err),
    };
    if get.status != StatusCode::OK {
        return ProbeVerdict::fail(
            Some(get.status),
            format!("probe GET returned {}, expected 200", get.status.as_u16()),
            None,
        );
    }
    if get.body != body {
        return ProbeVerdict::fail(
            Some(get.status),
            format!(
                "read body does not match written body for {} ({} bytes written, {} read)",
                file_name,
                body.len(),
                get.body.len()
            ),
            None,
        );
    }

    // Step 3: delete.
    let del = match client.delete(file_name).await {
        Ok(x) => x,
        Err(err) => return ProbeVerdict::transport("DELETE", &err),
    };
    if del.status != StatusCode::OK {
        return ProbeVerdict::fail(
            Some(del.status),
            format!("probe DELETE returned {}, expected 200", del.status.as_u16()),
            None,
        );
    }

    // Step 4: the name must be gone.
    let gone = match client.get(file_name).await {
        Ok(x) => x,
        Err(err) => return ProbeVerdict::transport("final GET", &err),
    };
    if gone.status != StatusCode::NOT_FOUND {
        return ProbeVerdict::fail(
            Some(gone.status),
            format!(
                "GET after DELETE returned {}, expected 404 for {}",
                gone.status.as_u16(),
                file_name
            ),
            None,
        );
    }

    debug!("consistency probe passed for {}", file_name);
    ProbeVerdict {
        status: Some(gone.status),
        failed: false,
        message: "consistency probe passed".into(),
        error: None,
    }
}
