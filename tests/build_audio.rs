//! End-to-end episode builds against a mocked VOICEVOX engine.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voicevox_build::build::{BuildError, BuildOptions, FailureStage, build_audio};
use voicevox_build::engine::{EngineClient, RetryPolicy};

const EPISODE_DIR: &str = "demo-project/run-20260214-1020";

struct Fixture {
    _dir: TempDir,
    run_dir: PathBuf,
    project_path: PathBuf,
}

impl Fixture {
    fn new(project: &Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join(EPISODE_DIR);
        let project_dir = run_dir.join("voicevox_project");
        std::fs::create_dir_all(&project_dir).unwrap();

        let project_path = project_dir.join("E01.vvproj");
        std::fs::write(&project_path, serde_json::to_vec_pretty(project).unwrap()).unwrap();
        Self { _dir: dir, run_dir, project_path }
    }

    fn audio_dir(&self) -> PathBuf {
        self.run_dir.join("audio")
    }

    fn manifest(&self) -> Value {
        let bytes = std::fs::read(self.audio_dir().join("manifest.json")).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        serde_json::from_slice(&bytes).unwrap()
    }

    fn options(&self) -> BuildOptions {
        BuildOptions::new(&self.project_path)
    }
}

fn wav(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn read_samples(path: &Path) -> (hound::WavSpec, Vec<i16>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let samples = reader.samples::<i16>().map(Result::unwrap).collect();
    (reader.spec(), samples)
}

fn engine_query() -> Value {
    json!({
        "accent_phrases": [{
            "moras": [{"text": "テ", "consonant": "t", "consonant_length": 0.05, "vowel": "e", "vowel_length": 0.08, "pitch": 5.6}],
            "accent": 1,
            "is_interrogative": false
        }],
        "speedScale": 1.0,
        "pitchScale": 0.0,
        "intonationScale": 1.0,
        "volumeScale": 1.0,
        "prePhonemeLength": 0.1,
        "postPhonemeLength": 0.1,
        "outputSamplingRate": 24000,
        "outputStereo": false,
        "kana": "テ"
    })
}

fn item(text: &str, style_id: u32) -> Value {
    json!({"text": text, "voice": {"engineId": "074fc39e", "speakerId": "7ffcb7ce", "styleId": style_id}})
}

fn project(keys: &[&str], items: Value) -> Value {
    json!({"appVersion": "0.25.0", "talk": {"audioKeys": keys, "audioItems": items}})
}

fn two_utterances() -> Value {
    project(&["E01_U001", "E01_U002"], json!({"E01_U001": item("一つ目です。", 1), "E01_U002": item("二つ目です。", 2)}))
}

fn client(server: &MockServer) -> EngineClient {
    EngineClient::new(&server.uri(), RetryPolicy { max_attempts: 3, base_delay_ms: 1, timeout_ms: 2000 }).unwrap()
}

async fn mount_audio_query(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/audio_query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(engine_query()))
        .mount(server)
        .await;
}

async fn mount_synthesis(server: &MockServer, style_id: u32, body: Vec<u8>) {
    Mock::given(method("POST"))
        .and(path("/synthesis"))
        .and(query_param("speaker", style_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn without_timestamp(mut manifest: Value) -> Value {
    manifest["meta"].as_object_mut().unwrap().remove("generated_at");
    manifest
}

#[tokio::test]
async fn test_merges_successful_utterances_in_order() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2, 3, 4])).await;
    mount_synthesis(&server, 2, wav(24000, &[5, 6, 7, 8])).await;

    let fixture = Fixture::new(&two_utterances());
    let result = build_audio(&client(&server), &fixture.options()).await.unwrap();

    assert_eq!(result.episode_id, "E01");
    assert_eq!((result.utterance_count, result.success_count, result.failure_count), (2, 2, 0));
    assert!(result.failures.is_empty());

    let merged_path = result.merged_wav_path.unwrap();
    assert_eq!(merged_path, fixture.audio_dir().join("E01.wav"));
    assert_eq!(std::fs::read(&merged_path).unwrap().len(), 60);
    let (spec, samples) = read_samples(&merged_path);
    assert_eq!(spec.sample_rate, 24000);
    assert_eq!(samples, [1, 2, 3, 4, 5, 6, 7, 8]);

    let manifest = fixture.manifest();
    assert_eq!(manifest["schema_version"], "1.0");
    assert_eq!(manifest["meta"]["project_id"], "demo-project");
    assert_eq!(manifest["meta"]["run_id"], "run-20260214-1020");
    assert_eq!(manifest["meta"]["episode_id"], "E01");
    assert_eq!(manifest["meta"]["source_vvproj"], "voicevox_project/E01.vvproj");
    assert_eq!(manifest["engine"], json!({"url": server.uri(), "app_version": "0.25.0"}));
    assert_eq!(manifest["parameters"], json!({"retry_max_attempts": 3, "retry_base_delay_ms": 1, "request_timeout_ms": 2000}));
    assert_eq!(manifest["output"]["merged_wav_path"], "audio/E01.wav");
    assert_eq!(manifest["summary"], json!({"total": 2, "succeeded": 2, "failed": 0}));

    let entries = manifest["utterances"].as_array().unwrap();
    assert_eq!(entries[0]["audio_key"], "E01_U001");
    assert_eq!(entries[1]["audio_key"], "E01_U002");
    assert_eq!(entries[0]["query_source"], "engine");
    assert_eq!(entries[0]["status"], "succeeded");
    assert_eq!(entries[0]["attempts"], json!({"audio_query": 1, "synthesis": 1}));
    assert_eq!(entries[0]["wav_path"], "audio/E01.wav");
    assert_eq!(entries[1]["voice"]["styleId"], 2);
    assert!(entries[0].get("error").is_none());
}

#[tokio::test]
async fn test_retries_query_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio_query"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;

    let fixture = Fixture::new(&project(&["E01_U001"], json!({"E01_U001": item("テスト", 1)})));
    let result = build_audio(&client(&server), &fixture.options()).await.unwrap();

    assert_eq!(result.success_count, 1);
    let manifest = fixture.manifest();
    assert_eq!(manifest["utterances"][0]["attempts"], json!({"audio_query": 2, "synthesis": 1}));
}

#[tokio::test]
async fn test_synthesis_client_error_is_recorded_without_retry() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;
    Mock::given(method("POST"))
        .and(path("/synthesis"))
        .and(query_param("speaker", "2"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::new(&two_utterances());
    let result = build_audio(&client(&server), &fixture.options()).await.unwrap();

    assert_eq!((result.success_count, result.failure_count), (1, 1));
    let failure = &result.failures[0];
    assert_eq!(failure.audio_key, "E01_U002");
    assert_eq!(failure.stage, FailureStage::Synthesis);
    assert_eq!(failure.status_code, Some(400));
    assert_eq!(failure.attempts, 1);
    assert!(!failure.retriable);

    let (_, samples) = read_samples(&result.merged_wav_path.unwrap());
    assert_eq!(samples, [1, 2]);

    let manifest = fixture.manifest();
    let entry = &manifest["utterances"][1];
    assert_eq!(entry["status"], "failed");
    assert_eq!(entry["attempts"], json!({"audio_query": 1, "synthesis": 1}));
    assert_eq!(entry["error"]["stage"], "synthesis");
    assert_eq!(entry["error"]["status_code"], 400);
    assert_eq!(entry["error"]["retriable"], false);
    assert_eq!(manifest["summary"], json!({"total": 2, "succeeded": 1, "failed": 1}));
}

#[tokio::test]
async fn test_supplied_query_skips_audio_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/audio_query")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[9, 9])).await;

    let mut supplied = item("テスト", 1);
    supplied["query"] = json!({
        "accentPhrases": [{"moras": [{"text": "テ", "vowel": "e", "vowelLength": 0.08, "pitch": 5.6}], "accent": 1}],
        "speedScale": 1.2,
        "outputSamplingRate": "engineDefault"
    });
    let fixture = Fixture::new(&project(&["E01_U001"], json!({"E01_U001": supplied})));
    build_audio(&client(&server), &fixture.options()).await.unwrap();

    let manifest = fixture.manifest();
    assert_eq!(manifest["utterances"][0]["query_source"], "supplied");
    assert_eq!(manifest["utterances"][0]["attempts"], json!({"audio_query": 0, "synthesis": 1}));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["speedScale"], 1.2);
    assert_eq!(body["outputSamplingRate"], 24000);
    assert_eq!(body["accent_phrases"][0]["moras"][0]["vowel_length"], 0.08);
}

#[tokio::test]
async fn test_format_mismatch_fails_build_but_writes_manifest() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;
    mount_synthesis(&server, 2, wav(48000, &[3, 4])).await;

    let fixture = Fixture::new(&two_utterances());
    let err = build_audio(&client(&server), &fixture.options()).await.unwrap_err();

    assert!(matches!(err, BuildError::Merge { .. }));
    assert!(err.to_string().contains("E01"));
    assert!(!fixture.audio_dir().join("E01.wav").exists());

    let manifest = fixture.manifest();
    assert_eq!(manifest["output"]["merged_wav_path"], Value::Null);
    assert_eq!(manifest["summary"], json!({"total": 2, "succeeded": 0, "failed": 2}));
    for entry in manifest["utterances"].as_array().unwrap() {
        assert_eq!(entry["status"], "failed");
        assert_eq!(entry["error"]["stage"], "merge");
        assert_eq!(entry["attempts"], json!({"audio_query": 1, "synthesis": 1}));
    }
}

#[tokio::test]
async fn test_invalid_synthesis_body_fails_only_that_utterance() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2, 3])).await;
    Mock::given(method("POST"))
        .and(path("/synthesis"))
        .and(query_param("speaker", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"detail":"oops"}"#))
        .mount(&server)
        .await;

    let fixture = Fixture::new(&two_utterances());
    let result = build_audio(&client(&server), &fixture.options()).await.unwrap();

    assert_eq!((result.success_count, result.failure_count), (1, 1));
    let failure = &result.failures[0];
    assert_eq!(failure.audio_key, "E01_U002");
    assert_eq!(failure.stage, FailureStage::Synthesis);
    assert_eq!(failure.attempts, 1);
    assert!(!failure.retriable);

    let (_, samples) = read_samples(&result.merged_wav_path.unwrap());
    assert_eq!(samples, [1, 2, 3]);

    let manifest = fixture.manifest();
    assert_eq!(manifest["output"]["merged_wav_path"], "audio/E01.wav");
    assert_eq!(manifest["summary"], json!({"total": 2, "succeeded": 1, "failed": 1}));
    assert_eq!(manifest["utterances"][0]["status"], "succeeded");
    let entry = &manifest["utterances"][1];
    assert_eq!(entry["status"], "failed");
    assert_eq!(entry["error"]["stage"], "synthesis");
    assert_eq!(entry["attempts"], json!({"audio_query": 1, "synthesis": 1}));
}

#[tokio::test]
async fn test_rebuild_produces_same_manifest() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;
    mount_synthesis(&server, 2, wav(24000, &[3, 4])).await;

    let fixture = Fixture::new(&two_utterances());
    let client = client(&server);

    build_audio(&client, &fixture.options()).await.unwrap();
    let first = fixture.manifest();
    let first_wav = std::fs::read(fixture.audio_dir().join("E01.wav")).unwrap();

    build_audio(&client, &fixture.options()).await.unwrap();
    let second = fixture.manifest();

    assert_eq!(without_timestamp(first), without_timestamp(second));
    assert_eq!(std::fs::read(fixture.audio_dir().join("E01.wav")).unwrap(), first_wav);
}

#[tokio::test]
async fn test_concurrent_build_keeps_track_order() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    Mock::given(method("POST"))
        .and(path("/synthesis"))
        .and(query_param("speaker", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wav(24000, &[1, 1])).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    mount_synthesis(&server, 2, wav(24000, &[2, 2])).await;
    mount_synthesis(&server, 3, wav(24000, &[3, 3])).await;

    let items = json!({"E01_U001": item("一", 1), "E01_U002": item("二", 2), "E01_U003": item("三", 3)});
    let fixture = Fixture::new(&project(&["E01_U001", "E01_U002", "E01_U003"], items));
    let result = build_audio(&client(&server), &fixture.options().with_concurrency(3)).await.unwrap();

    let (_, samples) = read_samples(&result.merged_wav_path.unwrap());
    assert_eq!(samples, [1, 1, 2, 2, 3, 3]);

    let keys: Vec<Value> = fixture.manifest()["utterances"].as_array().unwrap().iter().map(|e| e["audio_key"].clone()).collect();
    assert_eq!(keys, [json!("E01_U001"), json!("E01_U002"), json!("E01_U003")]);
}

#[tokio::test]
async fn test_all_failures_still_write_manifest_and_clear_stale_outputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/audio_query")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

    let fixture = Fixture::new(&two_utterances());
    std::fs::create_dir_all(fixture.audio_dir()).unwrap();
    std::fs::write(fixture.audio_dir().join("E01.wav"), b"stale").unwrap();
    std::fs::write(fixture.audio_dir().join("E01_U001.wav"), b"stale").unwrap();
    std::fs::write(fixture.audio_dir().join("E02.wav"), b"other episode").unwrap();

    let client = EngineClient::new(&server.uri(), RetryPolicy { max_attempts: 2, base_delay_ms: 1, timeout_ms: 2000 }).unwrap();
    let result = build_audio(&client, &fixture.options()).await.unwrap();

    assert_eq!((result.success_count, result.failure_count), (0, 2));
    assert!(result.merged_wav_path.is_none());
    assert!(result.failures.iter().all(|f| f.stage == FailureStage::Query && f.attempts == 2 && f.status_code == Some(503)));

    assert!(!fixture.audio_dir().join("E01.wav").exists());
    assert!(!fixture.audio_dir().join("E01_U001.wav").exists());
    assert!(fixture.audio_dir().join("E02.wav").exists());

    let manifest = fixture.manifest();
    assert_eq!(manifest["output"]["merged_wav_path"], Value::Null);
    assert_eq!(manifest["summary"], json!({"total": 2, "succeeded": 0, "failed": 2}));
    assert_eq!(manifest["utterances"][0]["attempts"], json!({"audio_query": 2}));
    assert_eq!(manifest["utterances"][0]["error"]["retriable"], false);
}

#[tokio::test]
async fn test_missing_audio_item_is_recorded_as_query_failure() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;

    let fixture = Fixture::new(&project(&["E01_U001", "E01_U404"], json!({"E01_U001": item("テスト", 1)})));
    let result = build_audio(&client(&server), &fixture.options()).await.unwrap();

    assert_eq!((result.utterance_count, result.success_count), (2, 1));
    assert_eq!(result.failures[0].message, "Missing audio item for key: E01_U404");

    let manifest = fixture.manifest();
    let entry = &manifest["utterances"][1];
    assert_eq!(entry["audio_key"], "E01_U404");
    assert_eq!(entry["text"], "");
    assert_eq!(entry["status"], "failed");
    assert_eq!(entry["attempts"], json!({"audio_query": 1}));
    assert_eq!(entry["error"]["stage"], "query");
}

#[tokio::test]
async fn test_explicit_run_dir_overrides_inference() {
    let server = MockServer::start().await;
    mount_audio_query(&server).await;
    mount_synthesis(&server, 1, wav(24000, &[1, 2])).await;

    let dir = tempfile::tempdir().unwrap();
    let project_path = dir.path().join("E05.vvproj");
    std::fs::write(&project_path, serde_json::to_vec(&project(&["E05_U001"], json!({"E05_U001": item("テスト", 1)}))).unwrap()).unwrap();

    let err = build_audio(&client(&server), &BuildOptions::new(&project_path)).await.unwrap_err();
    assert!(matches!(err, BuildError::RunDirUnknown(_)));

    let run_dir = dir.path().join("scratch");
    let result = build_audio(&client(&server), &BuildOptions::new(&project_path).with_run_dir(&run_dir)).await.unwrap();
    assert_eq!(result.episode_id, "E05");
    assert_eq!(result.manifest_path, run_dir.join("audio").join("manifest.json"));

    let manifest: Value = serde_json::from_slice(&std::fs::read(&result.manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["meta"]["run_id"], "unknown");
}
