//! Shell stand-ins for ffmpeg, so tests exercise the real subprocess path
//! without needing ffmpeg installed.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Every stub answers `-version` like ffmpeg does.
const PREAMBLE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 0.0-stub"
  exit 0
fi
"#;

/// Joins the files named in the manifest byte for byte, which is what a
/// stream copy of same-codec inputs amounts to.
pub const CONCAT_FFMPEG: &str = r#"
list=""
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -i) list="$2"; shift 2 ;;
    *) out="$1"; shift ;;
  esac
done
: > "$out"
while IFS= read -r line || [ -n "$line" ]; do
  path=$(printf '%s' "$line" | sed "s/^file '//; s/'\$//")
  cat "$path" >> "$out" || exit 1
done < "$list"
"#;

pub const FAILING_FFMPEG: &str = r#"
echo "[concat @ 0x0] Invalid data found when processing input" >&2
exit 1
"#;

pub const HANGING_FFMPEG: &str = r#"
exec sleep 30
"#;

/// Records its pid next to itself, writes a partial output and never exits.
pub const STALLING_FFMPEG: &str = r#"
for arg in "$@"; do out="$arg"; done
dir=$(dirname "$0")
echo $$ > "$dir/ffmpeg.pid.tmp" && mv "$dir/ffmpeg.pid.tmp" "$dir/ffmpeg.pid"
echo "partial" > "$out"
exec sleep 30
"#;

/// Write an executable stub named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("{}{}", PREAMBLE, body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // Another test thread forking while the file was open for writing makes
    // exec fail with ETXTBSY for a moment; wait until the stub runs.
    for _ in 0..50 {
        match std::process::Command::new(&path).arg("-version").output() {
            Ok(_) => break,
            Err(e) if e.raw_os_error() == Some(26) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("stub {} cannot run: {}", path.display(), e),
        }
    }
    path
}

/// A concatenating stub in `dir`.
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "ffmpeg", CONCAT_FFMPEG)
}

/// Pid written by [`STALLING_FFMPEG`] once it started in `dir`.
pub fn stalled_pid(dir: &Path) -> Option<u32> {
    std::fs::read_to_string(dir.join("ffmpeg.pid"))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// A zombie counts as gone: it was killed, only the reaping is pending.
fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Wait up to a few seconds for `pid` to die.
pub async fn wait_until_gone(pid: u32) -> bool {
    for _ in 0..60 {
        if !process_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
