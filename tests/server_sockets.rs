mod common;

use cidrelay::config::Config;
use cidrelay::helpers::HelperRunner;
use cidrelay::policy::{CallerPolicy, ListPolicy};
use cidrelay::protocol::{api_announce, server_announce};
use cidrelay::server::CidServer;
use common::{fixed_clock, gateway_config, pump, BlockOne, RecordingHelpers, TestClient};

const GATEWAY_CALL: &str = "CALL: ###DATE03301423...CALLIN...LINE1...NMBR4075551212...NAMEJOHN+++";
const GATEWAY_CID: &str = "CID: *DATE*03302024*TIME*1423*LINE*1*NMBR*4075551212*MESG*NONE*NAME*JOHN*";

fn started(
    config: Config,
    policy: impl CallerPolicy + Send + 'static,
    helpers: impl HelperRunner + Send + 'static,
) -> CidServer {
    let mut server = CidServer::with_parts(
        config,
        Box::new(policy),
        Box::new(helpers),
        Box::new(fixed_clock()),
    );
    server.start().unwrap();
    server
}

fn plain(config: Config) -> CidServer {
    let (helpers, _) = RecordingHelpers::new(&[]);
    started(config, BlockOne::default(), helpers)
}

#[test]
fn startup_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 4));
    let mut client = TestClient::connect(&mut server);
    let lines = client.read_through("300 End of connection startup");
    assert_eq!(
        lines,
        vec![
            server_announce(),
            api_announce(),
            "251 Call log not sent".to_string(),
            "300 End of connection startup".to_string(),
        ]
    );
    assert_eq!(server.client_count(), 1);
}

#[test]
fn startup_sends_call_log_and_hangup_option() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = gateway_config(dir.path(), 4);
    config.server.send_cidlog = true;
    config.lists.hangup = true;
    std::fs::write(
        &config.logs.cidlog,
        "CID: *DATE*03292024*TIME*0900*LINE*-*NMBR*555*MESG*NONE*NAME*A*\nold entry\n",
    )
    .unwrap();
    let mut server = plain(config);
    let mut client = TestClient::connect(&mut server);
    let lines = client.read_through("300 End of connection startup");
    assert_eq!(
        &lines[2..],
        &[
            "CIDLOG: *DATE*03292024*TIME*0900*LINE*-*NMBR*555*MESG*NONE*NAME*A*",
            "LOG: old entry",
            "250 End of call log",
            "OPT: hangup",
            "300 End of connection startup",
        ]
    );
}

#[test]
fn too_many_clients_are_turned_away() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 1));
    let mut first = TestClient::connect(&mut server);
    first.skip_banner();

    let mut second = TestClient::connect(&mut server);
    assert_eq!(second.read_line().as_deref(), Some("251 Call log not sent"));
    assert_eq!(
        second.read_line().as_deref(),
        Some("MSG: Too many clients connected (1) 03/30/2024 14:20:05")
    );
    assert_eq!(second.read_line(), None);
    assert_eq!(server.client_count(), 1);
}

#[test]
fn disconnect_frees_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 2));
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();
    assert_eq!(server.client_count(), 1);
    drop(client);
    pump(&mut server);
    assert_eq!(server.client_count(), 0);
}

#[test]
fn yo_is_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 4));
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();
    client.send("REQ: YO");
    pump(&mut server);
    assert_eq!(client.read_line().as_deref(), Some("ACK: REQ: YO"));
}

#[test]
fn gateway_call_is_logged_and_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let cidlog = config.logs.cidlog.clone();
    let mut server = plain(config);
    let mut gateway = TestClient::connect(&mut server);
    let mut listener = TestClient::connect(&mut server);
    gateway.skip_banner();
    listener.skip_banner();

    gateway.send(GATEWAY_CALL);
    pump(&mut server);

    assert_eq!(listener.read_line().as_deref(), Some(GATEWAY_CID));
    assert_eq!(gateway.read_line().as_deref(), Some(GATEWAY_CID));
    assert_eq!(
        std::fs::read_to_string(cidlog).unwrap(),
        format!("{}\n", GATEWAY_CID)
    );
}

#[test]
fn acknowledged_gateway_gets_ack_before_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 4));
    let mut gateway = TestClient::connect(&mut server);
    gateway.skip_banner();

    gateway.send("REQ: ACK");
    pump(&mut server);
    assert_eq!(gateway.read_line().as_deref(), Some("ACK: REQ: ACK"));

    gateway.send(GATEWAY_CALL);
    pump(&mut server);
    assert_eq!(
        gateway.read_line(),
        Some(format!("ACK: {}", GATEWAY_CALL))
    );
    assert_eq!(gateway.read_line().as_deref(), Some(GATEWAY_CID));

    gateway.send("NOT: voicemail waiting");
    pump(&mut server);
    assert_eq!(
        gateway.read_line().as_deref(),
        Some("ACK: NOT: voicemail waiting")
    );
    assert_eq!(
        gateway.read_line().as_deref(),
        Some("NOT: voicemail waiting ***DATE*03302024*TIME*1420*NAME*NO NAME*NMBR*NO-NUMBER*LINE*NO-LINE*MTYPE*-*")
    );
}

#[test]
fn messages_are_stamped_and_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let cidlog = config.logs.cidlog.clone();
    let mut server = plain(config);
    let mut sender = TestClient::connect(&mut server);
    let mut other = TestClient::connect(&mut server);
    sender.skip_banner();
    other.skip_banner();

    sender.send("MSG: dinner ###NAME*MOM*MTYPE*USER*");
    pump(&mut server);

    let expected =
        "MSG: dinner ***DATE*03302024*TIME*1420*NAME*MOM*NMBR*NO-NUMBER*LINE*NO-LINE*MTYPE*USER*";
    assert_eq!(other.read_line().as_deref(), Some(expected));
    assert_eq!(
        std::fs::read_to_string(cidlog).unwrap(),
        format!("{}\n", expected)
    );
}

#[test]
fn forwarded_server_lines_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let cidlog = config.logs.cidlog.clone();
    let mut server = plain(config);
    let mut peer = TestClient::connect(&mut server);
    let mut client = TestClient::connect(&mut server);
    peer.skip_banner();
    client.skip_banner();

    let line = "BLK: *DATE*03302024*TIME*1400*LINE*2*NMBR*8005551000*MESG*NONE*NAME*SPAM*";
    peer.send(line);
    peer.send("ZZZ: *DATE*03302024*");
    pump(&mut server);

    assert_eq!(client.read_line().as_deref(), Some(line));
    assert_eq!(client.read_line(), None);
    assert_eq!(
        std::fs::read_to_string(cidlog).unwrap(),
        format!("{}\n", line)
    );
}

#[test]
fn end_of_call_is_logged_not_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let cidlog = config.logs.cidlog.clone();
    let mut server = plain(config);
    let mut gateway = TestClient::connect(&mut server);
    let mut client = TestClient::connect(&mut server);
    gateway.skip_banner();
    client.skip_banner();

    gateway.send("CALLINFO: ###CANCEL...DATE03301419...SCALL03/30/2024 14:19:02...ECALL03/30/2024 14:19:30...CALLIN...LINE1...NMBR555...NAMEFoo+++");
    pump(&mut server);

    assert_eq!(client.read_line(), None);
    assert_eq!(
        std::fs::read_to_string(cidlog).unwrap(),
        "END: *HTYPE*CANCEL*DATE*03302024*TIME*1419*SCALL*03/30/2024 14:19:02*ECALL*03/30/2024 14:19:30*CTYPE*IN*LINE*1*NMBR*555*NAME*Foo*\n"
    );
}

#[test]
fn raw_lines_go_to_existing_data_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let datalog = config.logs.datalog.clone();
    std::fs::write(&datalog, "").unwrap();
    let mut server = plain(config);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("some unrecognized text");
    client.send(GATEWAY_CALL);
    pump(&mut server);

    assert_eq!(
        std::fs::read_to_string(datalog).unwrap(),
        format!("some unrecognized text\n{}\n", GATEWAY_CALL)
    );
}

#[test]
fn info_request_reports_alias_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    std::fs::write(&config.lists.alias, "alias 4075551212 = MOM\n").unwrap();
    std::fs::write(&config.lists.blacklist, "4075551212 #= Pest\n").unwrap();
    let policy = ListPolicy::load(&config.lists).unwrap();
    let (helpers, _) = RecordingHelpers::new(&[]);
    let mut server = started(config, policy, helpers);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: INFO 4075551212&&JOHN&&1");
    client.send("REQ: INFO 3215550000&&BOB&&1");
    pump(&mut server);

    assert_eq!(
        client.read_through("411 End of response"),
        vec![
            "403 Start of data defining permitted requests",
            "INFO: alias MOM",
            "INFO: black number",
            "411 End of response",
        ]
    );
    assert_eq!(
        client.read_through("411 End of response"),
        vec![
            "403 Start of data defining permitted requests",
            "INFO: alias NOALIAS",
            "INFO: neither",
            "411 End of response",
        ]
    );
}

#[test]
fn list_request_runs_the_utility_helper() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let blacklist = config.lists.blacklist.display().to_string();
    let whitelist = config.lists.whitelist.display().to_string();
    let alias = config.lists.alias.display().to_string();
    let util = config.helpers.util.clone();
    let (helpers, calls) = RecordingHelpers::new(&["added 8005551000 to blacklist"]);
    let mut server = started(config, BlockOne::default(), helpers);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: black add 8005551000 \"SPAM CALLER\"");
    pump(&mut server);
    assert_eq!(
        client.read_through("411 End of response"),
        vec![
            "402 Start of data showing status of handled request",
            "RESP: added 8005551000 to blacklist",
            "411 End of response",
        ]
    );

    client.send("REQ: alias add 8005551000 Spammer");
    pump(&mut server);
    client.read_through("411 End of response");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, util);
    assert_eq!(
        calls[0].1,
        vec![blacklist.clone(), "Black".into(), "add".into(), "8005551000".into(), "SPAM CALLER".into()]
    );
    assert_eq!(
        calls[1].1,
        vec![
            "--multi".to_string(),
            format!("{} {}", blacklist, whitelist),
            alias,
            "Alias".into(),
            "add".into(),
            "8005551000".into(),
            "Spammer".into(),
        ]
    );
}

#[test]
fn update_without_changes_needs_only_ok() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let alias = config.lists.alias.display().to_string();
    let cidlog = config.logs.cidlog.display().to_string();
    let (helpers, calls) = RecordingHelpers::new(&["no changes to call log", "ignored"]);
    let mut server = started(config, BlockOne::default(), helpers);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: UPDATES");
    pump(&mut server);
    assert_eq!(
        client.read_through("410 End of data"),
        vec![
            "400 Start of data requiring OK",
            "INFO: no changes to call log",
            "410 End of data",
        ]
    );
    assert_eq!(
        calls.lock().unwrap()[0].1,
        vec!["-a".to_string(), alias, "-c".into(), cidlog, "--multi".into()]
    );
}

#[test]
fn update_with_changes_needs_accept() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let (helpers, _) = RecordingHelpers::new(&["Modified: cidcall.log", "3 lines changed"]);
    let mut server = started(config, BlockOne::default(), helpers);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: UPDATE");
    pump(&mut server);
    assert_eq!(
        client.read_through("410 End of data"),
        vec![
            "401 Start of data requiring ACCEPT or REJECT",
            "INFO: Modified: cidcall.log",
            "INFO: 3 lines changed",
            "410 End of data",
        ]
    );
}

#[test]
fn reload_reports_files_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 4));
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: RELOAD");
    pump(&mut server);
    assert_eq!(
        client.read_through("410 End of data"),
        vec![
            "400 Start of data requiring OK",
            "INFO: Alias, blacklist and whitelist files have been read",
            "410 End of data",
        ]
    );
}

#[test]
fn reread_sends_call_log_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = plain(gateway_config(dir.path(), 4));
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("REQ: REREAD");
    pump(&mut server);
    assert_eq!(client.read_line().as_deref(), Some("253 No Call log"));

    client.send(GATEWAY_CALL);
    pump(&mut server);
    assert_eq!(client.read_line().as_deref(), Some(GATEWAY_CID));

    client.send("REQ: REREAD");
    pump(&mut server);
    assert_eq!(
        client.read_through("250 End of call log"),
        vec![
            "CIDLOG: *DATE*03302024*TIME*1423*LINE*1*NMBR*4075551212*MESG*NONE*NAME*JOHN*",
            "250 End of call log",
        ]
    );
}

#[test]
fn accept_log_replaces_call_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), 4);
    let cidlog = config.logs.cidlog.clone();
    std::fs::write(&cidlog, "old\n").unwrap();
    std::fs::write(dir.path().join("cidcall.log.new"), "rewritten\n").unwrap();
    std::fs::write(dir.path().join("cidcall.log.1.new"), "older rewritten\n").unwrap();
    let mut server = plain(config);
    let mut client = TestClient::connect(&mut server);
    client.skip_banner();

    client.send("WRK: ACCEPT LOG");
    pump(&mut server);

    assert_eq!(std::fs::read_to_string(&cidlog).unwrap(), "rewritten\n");
    assert!(!dir.path().join("cidcall.log.new").exists());
    assert!(dir.path().join("cidcall.log.1.new").exists());

    client.send("WRK: REJECT LOGS");
    pump(&mut server);
    assert!(!dir.path().join("cidcall.log.1.new").exists());
    assert!(!dir.path().join("cidcall.log.1").exists());
}
