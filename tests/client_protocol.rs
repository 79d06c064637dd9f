use cidrelay::protocol::{ClientLine, ListKind, MessageKind, Request, Work};

#[test]
fn test_call_line() {
    match ClientLine::parse("CALL: ###DATE03301423...CALLIN...LINE1...NMBR555...NAMEX+++") {
        ClientLine::Call(body) => assert!(body.starts_with("###DATE")),
        other => panic!("Expected Call, got {:?}", other),
    }
}

#[test]
fn test_empty_line() {
    assert_eq!(ClientLine::parse(""), ClientLine::Empty);
}

#[test]
fn test_forwarded_server_lines() {
    for line in [
        "CID: *DATE*03302024*TIME*1423*LINE*1*NMBR*555*MESG*NONE*NAME*X*",
        "CIDINFO: *LINE*1*RING*2*TIME*14:23:00*",
        "HUP: *DATE*03302024*TIME*1423*LINE*1*NMBR*555*MESG*NONE*NAME*X*",
        "MSG: hello ***DATE*03302024*TIME*1423*NAME*X*NMBR*555*LINE*1*MTYPE*IN*",
    ] {
        match ClientLine::parse(line) {
            ClientLine::Forward(l) => assert_eq!(l, line),
            other => panic!("Expected Forward for {}, got {:?}", line, other),
        }
    }
}

#[test]
fn test_unknown_forward_tag() {
    match ClientLine::parse("XYZ: *DATE*03302024*") {
        ClientLine::UnknownForward(_) => {}
        other => panic!("Expected UnknownForward, got {:?}", other),
    }
}

#[test]
fn test_plain_messages() {
    match ClientLine::parse("MSG: dinner is ready") {
        ClientLine::Message(MessageKind::Msg, text) => assert_eq!(text, "MSG: dinner is ready"),
        other => panic!("Expected Msg, got {:?}", other),
    }
    match ClientLine::parse("NOT: new voicemail") {
        ClientLine::Message(MessageKind::Not, _) => {}
        other => panic!("Expected Not, got {:?}", other),
    }
}

#[test]
fn test_simple_requests() {
    let cases = [
        ("REQ: RELOAD", Request::Reload),
        ("REQ: UPDATE", Request::Update { multi: false }),
        ("REQ: UPDATES", Request::Update { multi: true }),
        ("REQ: REREAD", Request::Reread),
        ("REQ: ACK", Request::Ack),
        ("REQ: YO", Request::Yo),
    ];
    for (line, expected) in cases {
        assert_eq!(ClientLine::parse(line), ClientLine::Request(expected), "{}", line);
    }
}

#[test]
fn test_list_request_keeps_arguments() {
    match ClientLine::parse("REQ: black add 4075551212 \"SPAM CALLER\"") {
        ClientLine::Request(Request::List { list, args }) => {
            assert_eq!(list, ListKind::Black);
            assert_eq!(args, "add 4075551212 \"SPAM CALLER\"");
        }
        other => panic!("Expected List, got {:?}", other),
    }
}

#[test]
fn test_info_request_fields() {
    match ClientLine::parse("REQ: INFO 4075551212&&JOHN DOE&&1") {
        ClientLine::Request(Request::Info { number, name, line }) => {
            assert_eq!(number, "4075551212");
            assert_eq!(name, "JOHN DOE");
            assert_eq!(line, "1");
        }
        other => panic!("Expected Info, got {:?}", other),
    }
}

#[test]
fn test_keywords_are_exact() {
    for line in ["REQ: RELOADX", "REQ: yo", "REQ: black", "REQ: ACK now"] {
        match ClientLine::parse(line) {
            ClientLine::Request(Request::Unsupported(_)) => {}
            other => panic!("Expected Unsupported for {}, got {:?}", line, other),
        }
    }
}

#[test]
fn test_work_requests() {
    assert_eq!(
        ClientLine::parse("WRK: ACCEPT LOG"),
        ClientLine::Work(Work::AcceptLog { all: false })
    );
    assert_eq!(
        ClientLine::parse("WRK: REJECT LOGS"),
        ClientLine::Work(Work::RejectLog { all: true })
    );
    assert_eq!(ClientLine::parse("WRK: ACCEPT"), ClientLine::Work(Work::Unsupported));
}

#[test]
fn test_unknown_text() {
    match ClientLine::parse("hello there") {
        ClientLine::Unknown(t) => assert_eq!(t, "hello there"),
        other => panic!("Expected Unknown, got {:?}", other),
    }
}
