//! Decoding of clamd response text.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::command::CommandDef;
use crate::error::{ClamdError, ClamdResult};
use crate::result::{Detections, ScanResult};

const UNKNOWN_COMMAND: &str = "UNKNOWN COMMAND";
const COMMANDS_MARKER: &str = "| COMMANDS:";
const RELOADING: &str = "RELOADING";

/// `[prefix: ]<object>: <signature> FOUND`. The optional leading group
/// absorbs session/stream prefixes so the object is always the last path
/// before the signature.
static FOUND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.+: )?(.+?): (.+) FOUND$").expect("FOUND line pattern should compile")
});

/// Strip the terminator and reject `UNKNOWN COMMAND`.
///
/// # Errors
///
/// Returns `UnknownCommand` naming the verb that was sent.
pub fn body(def: CommandDef, raw: &str) -> ClamdResult<&str> {
    let body = def.format.strip_terminator(raw);
    if body.trim() == UNKNOWN_COMMAND {
        return Err(ClamdError::UnknownCommand(def.verb));
    }
    Ok(body)
}

#[must_use]
pub fn is_pong(body: &str) -> bool {
    body.trim().eq_ignore_ascii_case("PONG")
}

/// Command names advertised after `| COMMANDS:`.
///
/// # Errors
///
/// Returns `InvalidResponse` if the marker is missing.
pub fn command_list(verb: &'static str, body: &str) -> ClamdResult<Vec<String>> {
    let (_, commands) = body
        .split_once(COMMANDS_MARKER)
        .ok_or_else(|| ClamdError::invalid(verb, body))?;
    Ok(commands.split_whitespace().map(str::to_string).collect())
}

/// # Errors
///
/// Returns `InvalidResponse` unless the body is exactly `RELOADING`.
pub fn reloading(verb: &'static str, body: &str) -> ClamdResult<()> {
    if body == RELOADING {
        Ok(())
    } else {
        Err(ClamdError::invalid(verb, body))
    }
}

/// Decode the answer of a scan command.
///
/// Shapes are tried in order: every line `... OK` (clean), any `FOUND`
/// (detections), a line ending in ` ERROR` (scan failure).
///
/// # Errors
///
/// `ScanFailure` for clamd-reported errors, `InvalidResponse` for text that
/// fits none of the shapes.
pub fn scan_result(verb: &'static str, body: &str) -> ClamdResult<ScanResult> {
    let lines: Vec<&str> = body
        .split(['\0', '\n'])
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();

    if !lines.is_empty() && lines.iter().all(|l| l.ends_with(" OK")) {
        return Ok(ScanResult::Ok);
    }

    if body.contains("FOUND") {
        let mut detections = Detections::new();
        for line in lines.iter().filter(|l| l.ends_with(" FOUND")) {
            let caps = FOUND_LINE
                .captures(line)
                .ok_or_else(|| ClamdError::invalid(verb, body))?;
            trace!(object = &caps[1], signature = &caps[2], "detection");
            detections
                .entry(caps[1].to_string())
                .or_default()
                .push(caps[2].to_string());
        }
        if detections.is_empty() {
            return Err(ClamdError::invalid(verb, body));
        }
        return Ok(ScanResult::Virus(detections));
    }

    if lines.iter().any(|l| l.ends_with(" ERROR")) {
        return Err(ClamdError::ScanFailure(body.trim().to_string()));
    }

    Err(ClamdError::invalid(verb, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandFormat, PING};

    fn scan(body: &str) -> ClamdResult<ScanResult> {
        scan_result("SCAN", body)
    }

    fn signatures<'a>(r: &'a ScanResult, object: &str) -> &'a [String] {
        &r.detections().unwrap()[object]
    }

    #[test]
    fn body_strips_terminator() {
        assert_eq!(body(PING, "PONG\0").unwrap(), "PONG");
    }

    #[test]
    fn body_detects_unknown_command() {
        assert!(matches!(
            body(PING, "UNKNOWN COMMAND\0"),
            Err(ClamdError::UnknownCommand("PING"))
        ));
        let newline = CommandDef::new("STATS", CommandFormat::NewLine);
        assert!(matches!(
            body(newline, "UNKNOWN COMMAND\n"),
            Err(ClamdError::UnknownCommand("STATS"))
        ));
    }

    #[test]
    fn clean_file() {
        assert!(scan("/tmp/a.txt: OK").unwrap().is_ok());
    }

    #[test]
    fn clean_directory_listing() {
        assert!(scan("/tmp/a.txt: OK\0/tmp/b.txt: OK").unwrap().is_ok());
        assert!(scan("/tmp/a.txt: OK\n/tmp/b.txt: OK\n").unwrap().is_ok());
    }

    #[test]
    fn infected_file() {
        let r = scan("/tmp/a.txt: Eicar-Test-Signature FOUND").unwrap();
        assert_eq!(r.detections().unwrap().len(), 1);
        assert_eq!(signatures(&r, "/tmp/a.txt"), ["Eicar-Test-Signature"]);
    }

    #[test]
    fn infected_stream() {
        let r = scan_result("INSTREAM", "stream: Eicar-Test-Signature FOUND").unwrap();
        assert_eq!(signatures(&r, "stream"), ["Eicar-Test-Signature"]);
    }

    #[test]
    fn session_prefix_discarded() {
        let r = scan("1: stream: Win.Test.EICAR_HDB-1 FOUND").unwrap();
        assert_eq!(signatures(&r, "stream"), ["Win.Test.EICAR_HDB-1"]);
    }

    #[test]
    fn mixed_lines_group_by_object() {
        let body = "/d/a: OK\0/d/b: Sig-1 FOUND\0/d/b: Sig-2 FOUND\0/d/c: Sig-1 FOUND";
        let r = scan_result("ALLMATCHSCAN", body).unwrap();
        assert_eq!(signatures(&r, "/d/b"), ["Sig-1", "Sig-2"]);
        assert_eq!(signatures(&r, "/d/c"), ["Sig-1"]);
        assert!(!r.detections().unwrap().contains_key("/d/a"));
    }

    #[test]
    fn duplicate_signatures_kept() {
        let r = scan("/x: Sig FOUND\n/x: Sig FOUND").unwrap();
        assert_eq!(signatures(&r, "/x"), ["Sig", "Sig"]);
    }

    #[test]
    fn found_without_detection_line_is_invalid() {
        assert!(matches!(
            scan("FOUND"),
            Err(ClamdError::InvalidResponse { command: "SCAN", .. })
        ));
        assert!(matches!(
            scan("/x: FOUND something"),
            Err(ClamdError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn malformed_found_line_is_invalid() {
        assert!(matches!(
            scan("/x: Sig FOUND\nno separator FOUND"),
            Err(ClamdError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn error_is_scan_failure() {
        match scan("/tmp/a.txt: Some Error ERROR") {
            Err(ClamdError::ScanFailure(text)) => assert_eq!(text, "/tmp/a.txt: Some Error ERROR"),
            other => panic!("expected scan failure, got {other:?}"),
        }
    }

    #[test]
    fn size_limit_is_scan_failure() {
        assert!(matches!(
            scan_result("INSTREAM", "INSTREAM size limit exceeded. ERROR"),
            Err(ClamdError::ScanFailure(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(scan("hello"), Err(ClamdError::InvalidResponse { .. })));
        assert!(matches!(scan(""), Err(ClamdError::InvalidResponse { .. })));
    }

    #[test]
    fn command_list_after_marker() {
        let body = "ClamAV 1.0.5/27210/Tue Mar 12 2024| COMMANDS: SCAN QUIT RELOAD PING CONTSCAN VERSIONCOMMANDS VERSION END SHUTDOWN MULTISCAN FILDES STATS IDSESSION INSTREAM DETSTATSCLEAR DETSTATS ALLMATCHSCAN";
        let cmds = command_list("VERSIONCOMMANDS", body).unwrap();
        assert_eq!(cmds.first().map(String::as_str), Some("SCAN"));
        assert_eq!(cmds.last().map(String::as_str), Some("ALLMATCHSCAN"));
        assert_eq!(cmds.len(), 17);
    }

    #[test]
    fn command_list_without_marker_is_invalid() {
        assert!(matches!(
            command_list("VERSIONCOMMANDS", "ClamAV 1.0.5"),
            Err(ClamdError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn reloading_exact() {
        assert!(reloading("RELOAD", "RELOADING").is_ok());
        assert!(reloading("RELOAD", "RELOADING NOW").is_err());
    }
}
