use predicates::prelude::*;

fn hdbsnap() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hdbsnap");
    for var in [
        "HDBSNAP_HOST_ID",
        "HDBSNAP_HDB_USER_KEY",
        "HDBSNAP_WAITER_MODEL",
        "HDBSNAP_IMDS_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "info");
    cmd
}

#[test]
fn waiters_prints_builtin_model() {
    let mut cmd = hdbsnap();
    cmd.arg("waiters");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"version\": 2"))
        .stdout(predicate::str::contains("ssmCommandInvocations"))
        .stdout(predicate::str::contains("ebsSnapshotsCompleted"))
        .stdout(predicate::str::contains("\"maxAttempts\": 120"));
}

#[test]
fn unreadable_waiter_model_fails() {
    let mut cmd = hdbsnap();
    cmd.args(["waiters", "--waiter-model", "/nonexistent/hdbsnap-waiters.json"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn prepared_without_user_key_is_a_configuration_error() {
    let mut cmd = hdbsnap();
    cmd.arg("prepared");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn status_reports_missing_hdbsql() {
    let mut cmd = hdbsnap();
    cmd.args([
        "status",
        "--hdb-user-key",
        "BACKUP",
        "--hdbsql-bin",
        "/nonexistent/hdbsql",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot reach hdbsql"))
        .stderr(predicate::str::contains("not found"));
}

#[tokio::test]
async fn volumes_resolves_host_from_instance_metadata() {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/instance-id"))
        .and(header("x-aws-ec2-metadata-token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("i-0feedface"))
        .mount(&server)
        .await;

    let mut cmd = hdbsnap();
    cmd.args([
        "volumes",
        "--imds-url",
        &server.uri(),
        "--aws-bin",
        "/nonexistent/aws",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("i-0feedface"))
        .stderr(predicate::str::contains("cannot reach ec2"));
}
