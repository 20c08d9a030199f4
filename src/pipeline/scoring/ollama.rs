use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{GenerateRequest, LlmClient};
use super::InferenceError;

/// Model load can take minutes for large models on first use.
const WARM_UP_TIMEOUT_SECS: u64 = 600;

/// Ollama HTTP client for local LLM inference.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a client whose every request is bounded by `timeout_secs`.
    /// Proxies are bypassed: the inference server runs on this machine.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, InferenceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .no_proxy()
            .build()
            .map_err(|e| InferenceError::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error, timeout_secs: u64) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(timeout_secs)
        } else if e.is_connect() {
            InferenceError::Connection(self.base_url.clone())
        } else {
            InferenceError::Http(e.to_string())
        }
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, InferenceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(InferenceError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// A generate request with only a model name loads it without generating.
#[derive(Serialize)]
struct WarmUpRequest<'a> {
    model: &'a str,
}

impl LlmClient for OllamaClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(|e| self.map_send_error(e, self.timeout_secs))?;
        let response = Self::check_status(response)?;

        // The body read shares the request deadline and can time out too.
        let parsed: GenerateResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout_secs)
            } else {
                InferenceError::MalformedResponse(e.to_string())
            }
        })?;

        Ok(parsed.response)
    }

    fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e, self.timeout_secs))?;
        let response = Self::check_status(response)?;

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn warm_up(&self, model: &str) -> Result<(), InferenceError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(WARM_UP_TIMEOUT_SECS))
            .json(&WarmUpRequest { model })
            .send()
            .map_err(|e| self.map_send_error(e, WARM_UP_TIMEOUT_SECS))?;
        Self::check_status(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::pipeline::scoring::types::{score_format_schema, GenerateOptions};

    /// Read one HTTP request (headers + Content-Length body) and return the body.
    fn read_request(stream: &mut TcpStream) -> String {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(value) = lower.strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        String::from_utf8(body).unwrap()
    }

    /// Serve exactly one request, optionally stalling before the reply.
    /// Returns the base URL and a channel carrying the request body.
    fn serve_once(
        status: &'static str,
        body: &'static str,
        stall: Option<Duration>,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let _ = tx.send(request);
            if let Some(delay) = stall {
                thread::sleep(delay);
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(reply.as_bytes());
        });
        (format!("http://{addr}"), rx)
    }

    fn request<'a>(
        options: &'a GenerateOptions,
        format: &'a serde_json::Value,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: "gemma3:27b",
            prompt: "Rate: Title",
            stream: false,
            options,
            format,
        }
    }

    #[test]
    fn client_constructor() {
        let client = OllamaClient::new("http://localhost:11434", 60).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.timeout_secs, 60);
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", 60).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn generate_returns_inner_response_string() {
        let (url, rx) = serve_once(
            "200 OK",
            r#"{"model":"gemma3:27b","response":"{\"score\": 3, \"explanation\": \"ok\"}","done":true}"#,
            None,
        );
        let client = OllamaClient::new(&url, 5).unwrap();
        let options = GenerateOptions {
            num_ctx: 3000,
            temperature: 0.0,
        };
        let format = score_format_schema();

        let raw = client.generate(&request(&options, &format)).unwrap();
        assert_eq!(raw, r#"{"score": 3, "explanation": "ok"}"#);

        let sent: serde_json::Value = serde_json::from_str(&rx.recv().unwrap()).unwrap();
        assert_eq!(sent["model"], "gemma3:27b");
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["format"]["required"][0], "score");
    }

    #[test]
    fn generate_maps_http_error_status() {
        let (url, _rx) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#, None);
        let client = OllamaClient::new(&url, 5).unwrap();
        let options = GenerateOptions {
            num_ctx: 3000,
            temperature: 0.0,
        };
        let format = score_format_schema();

        let err = client.generate(&request(&options, &format)).unwrap_err();
        assert!(matches!(err, InferenceError::Api { status: 500, .. }));
    }

    #[test]
    fn generate_rejects_body_without_response_field() {
        let (url, _rx) = serve_once("200 OK", r#"{"done":true}"#, None);
        let client = OllamaClient::new(&url, 5).unwrap();
        let options = GenerateOptions {
            num_ctx: 3000,
            temperature: 0.0,
        };
        let format = score_format_schema();

        let err = client.generate(&request(&options, &format)).unwrap_err();
        assert!(matches!(err, InferenceError::MalformedResponse(_)));
    }

    #[test]
    fn slow_server_is_timeout_kind() {
        let (url, _rx) = serve_once("200 OK", r#"{"response":"{}"}"#, Some(Duration::from_secs(4)));
        let client = OllamaClient::new(&url, 1).unwrap();
        let options = GenerateOptions {
            num_ctx: 3000,
            temperature: 0.0,
        };
        let format = score_format_schema();

        let err = client.generate(&request(&options, &format)).unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(matches!(err, InferenceError::Timeout(1)));
    }

    #[test]
    fn refused_connection_is_connection_kind() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = OllamaClient::new(&format!("http://127.0.0.1:{port}"), 2).unwrap();

        let err = client.list_models().unwrap_err();
        assert!(matches!(err, InferenceError::Connection(_)), "got {err:?}");
        assert!(!err.is_timeout());
    }

    #[test]
    fn list_models_and_availability() {
        let (url, _rx) = serve_once(
            "200 OK",
            r#"{"models":[{"name":"gemma3:27b"},{"name":"llama3:8b"}]}"#,
            None,
        );
        let client = OllamaClient::new(&url, 5).unwrap();
        assert!(client.is_model_available("gemma3:27b").unwrap());
    }

    #[test]
    fn warm_up_sends_model_only() {
        let (url, rx) = serve_once("200 OK", r#"{"model":"gemma3:27b","response":"","done":true}"#, None);
        let client = OllamaClient::new(&url, 5).unwrap();

        client.warm_up("gemma3:27b").unwrap();
        let sent: serde_json::Value = serde_json::from_str(&rx.recv().unwrap()).unwrap();
        assert_eq!(sent, serde_json::json!({"model": "gemma3:27b"}));
    }
}
