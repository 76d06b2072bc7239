//! CLI test cases.
//!
//! Most of these run the real binary against small shell scripts standing in
//! for `pdfinfo`, `pdftocairo` and `tesseract`, so they only need a POSIX
//! shell. The tests that need poppler and tesseract with CJK language data
//! installed are ignored by default.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("pdf-ocr-batch").unwrap();
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema_document_record() {
    cmd()
        .arg("schema")
        .arg("DocumentRecord")
        .assert()
        .success()
        .stdout(predicate::str::contains("no_content"));
}

#[test]
fn test_schema_config_file() {
    cmd()
        .arg("schema")
        .arg("ConfigFile")
        .assert()
        .success()
        .stdout(predicate::str::contains("page_timeout_secs"));
}

#[cfg(unix)]
mod fake_tools {
    use std::{fs, os::unix::fs::PermissionsExt as _, path::Path};

    use tempfile::TempDir;

    use super::*;

    /// Prints one page per `%%page` line in the input, and the title from any
    /// `%%title` line.
    const FAKE_PDFINFO: &str = r#"#!/bin/sh
pages=$(grep -c '^%%page' "$1" || true)
title=$(sed -n 's/^%%title //p' "$1")
if [ -n "$title" ]; then
    echo "Title:          $title"
fi
echo "Producer:       fake"
echo "Pages:          $pages"
"#;

    /// Copies `$FAKE_PNG` to the output base name, which is the last argument.
    const FAKE_PDFTOCAIRO: &str = r#"#!/bin/sh
for last; do :; done
cp "$FAKE_PNG" "$last.png"
"#;

    /// Each model produces fixed text, with `jpn` the most confident.
    const FAKE_TESSERACT: &str = r#"#!/bin/sh
if [ "$1" = "--list-langs" ]; then
    echo 'List of available languages in "/fake/tessdata/" (5):'
    printf 'chi_sim\nchi_tra\neng\njpn\nkor\n'
    exit 0
fi
base="$2"
model="$4"
case "$model" in
    jpn) conf=91; text="これはテストです" ;;
    kor) conf=40; text="테스트" ;;
    *) conf=10; text="test" ;;
esac
printf '%s\n' "$text" > "$base.txt"
printf 'level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n' > "$base.tsv"
printf '5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t%s\t%s\n' "$conf" "$text" >> "$base.tsv"
"#;

    /// Fails every page, complaining about the image path like leptonica does.
    const FAILING_TESSERACT: &str = r#"#!/bin/sh
if [ "$1" = "--list-langs" ]; then
    echo 'List of available languages in "/fake/tessdata/" (2):'
    printf 'jpn\nkor\n'
    exit 0
fi
echo "Error in pixRead: pix not read: $1" >&2
echo "Cannot write $2.txt" >&2
exit 1
"#;

    /// A scratch area with fake tools, an input directory and an output
    /// directory.
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::with_prefix("cli-test").unwrap();
            fs::create_dir_all(dir.path().join("bin")).unwrap();
            image::RgbImage::new(20, 20)
                .save(dir.path().join("page.png"))
                .unwrap();
            fs::create_dir_all(dir.path().join("input")).unwrap();
            let ws = Self { dir };
            ws.install_tool("pdfinfo", FAKE_PDFINFO);
            ws.install_tool("pdftocairo", FAKE_PDFTOCAIRO);
            ws.install_tool("tesseract", FAKE_TESSERACT);
            ws
        }

        /// Install (or replace) a fake tool.
        fn install_tool(&self, name: &str, script: &str) {
            let path = self.path().join("bin").join(name);
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Add a fake PDF with `pages` pages.
        fn add_pdf(&self, name: &str, pages: usize) {
            let mut contents = "%PDF-1.4\n".to_owned();
            for _ in 0..pages {
                contents.push_str("%%page\n");
            }
            fs::write(self.path().join("input").join(name), contents).unwrap();
        }

        /// Add a fake PDF with one page and a metadata title.
        fn add_pdf_with_title(&self, name: &str, title: &str) {
            let contents = format!("%PDF-1.4\n%%title {}\n%%page\n", title);
            fs::write(self.path().join("input").join(name), contents).unwrap();
        }

        /// Add a file that isn't a PDF.
        fn add_garbage(&self, name: &str) {
            fs::write(self.path().join("input").join(name), "not a pdf").unwrap();
        }

        fn output(&self, name: &str) -> String {
            fs::read_to_string(self.path().join("output").join(name)).unwrap()
        }

        /// A command with our fake tools and directories configured.
        fn cmd(&self, subcmd: &str) -> Command {
            let bin = self.path().join("bin");
            let mut cmd = cmd();
            cmd.env("FAKE_PNG", self.path().join("page.png"))
                .arg(subcmd)
                .arg("--input-dir")
                .arg(self.path().join("input"))
                .arg("--output-dir")
                .arg(self.path().join("output"))
                .arg("--pdfinfo-cmd")
                .arg(bin.join("pdfinfo"))
                .arg("--pdftocairo-cmd")
                .arg(bin.join("pdftocairo"))
                .arg("--tesseract-cmd")
                .arg(bin.join("tesseract"));
            cmd
        }
    }

    #[test]
    fn test_run_report_and_broken() {
        let ws = Workspace::new();
        ws.add_pdf("report.pdf", 3);
        ws.add_garbage("broken.pdf");

        ws.cmd("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("1 of 2 documents failed"));

        assert_eq!(
            ws.output("report.txt"),
            "これはテストです\n\x0C\nこれはテストです\n\x0C\nこれはテストです\n"
        );
        assert!(!ws.path().join("output").join("broken.txt").exists());

        let summary: serde_json::Value =
            serde_json::from_str(&ws.output("batch-summary.json")).unwrap();
        assert_eq!(summary["succeeded"], 1);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["documents"][0]["id"], "broken");
        assert_eq!(summary["documents"][0]["status"], "failed");

        let record: serde_json::Value =
            serde_json::from_str(&ws.output("report.ocr.json")).unwrap();
        assert_eq!(record["status"], "ok");
        assert_eq!(record["pages"][0]["model"], "jpn");
        assert_eq!(record["pages"][2]["script"], "japanese");
    }

    #[test]
    fn test_run_is_idempotent() {
        let ws = Workspace::new();
        ws.add_pdf("a.pdf", 2);
        ws.add_pdf("b.pdf", 1);

        ws.cmd("run").args(["--jobs", "1"]).assert().success();
        let first = ["a.txt", "a.ocr.json", "b.txt", "b.ocr.json", "batch-summary.json"]
            .map(|name| ws.output(name));
        ws.cmd("run").args(["--jobs", "8"]).assert().success();
        let second = ["a.txt", "a.ocr.json", "b.txt", "b.ocr.json", "batch-summary.json"]
            .map(|name| ws.output(name));
        assert_eq!(first, second);
    }

    #[test]
    fn test_run_with_missing_model_fails_before_starting() {
        let ws = Workspace::new();
        ws.add_pdf("a.pdf", 1);

        ws.cmd("run")
            .args(["--models", "jpn,tha"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not installed: tha"));
        assert!(!ws.path().join("output").join("batch-summary.json").exists());
    }

    #[test]
    fn test_run_with_config_file() {
        let ws = Workspace::new();
        ws.add_pdf("a.pdf", 2);
        let config = ws.path().join("config.toml");
        fs::write(
            &config,
            "models = [\"kor\"]\npage_separator = \"blank-line\"\n",
        )
        .unwrap();

        ws.cmd("run").arg("--config").arg(&config).assert().success();
        assert_eq!(ws.output("a.txt"), "테스트\n\n테스트\n");
    }

    #[test]
    fn test_failure_reports_do_not_mention_scratch_dirs() {
        let ws = Workspace::new();
        ws.install_tool("tesseract", FAILING_TESSERACT);
        ws.add_pdf("a.pdf", 2);

        let mut runs = vec![];
        for _ in 0..2 {
            ws.cmd("run")
                .args(["--models", "jpn,kor"])
                .assert()
                .failure()
                .stderr(predicate::str::contains("1 of 1 documents failed"));
            runs.push((ws.output("a.ocr.json"), ws.output("batch-summary.json")));
        }
        assert_eq!(runs[0], runs[1]);

        let (record, _) = &runs[0];
        assert!(
            record.contains("pix not read: <scratch>/page.png"),
            "{}",
            record
        );
        assert!(record.contains("Cannot write <scratch>/output.txt"), "{}", record);
        let tmp = std::env::temp_dir();
        let tmp = tmp.to_string_lossy();
        assert!(!record.contains(tmp.trim_end_matches('/')), "{}", record);
    }

    #[test]
    fn test_metadata_title_is_used() {
        let ws = Workspace::new();
        ws.add_pdf_with_title("titled.pdf", "Widget Survey: Final Report");
        ws.add_pdf_with_title("short.pdf", "Doc");
        ws.cmd("run").assert().success();

        let titled: serde_json::Value =
            serde_json::from_str(&ws.output("titled.ocr.json")).unwrap();
        assert_eq!(titled["title"], "Widget Survey: Final Report");
        let short: serde_json::Value =
            serde_json::from_str(&ws.output("short.ocr.json")).unwrap();
        assert_eq!(short["title"], "これはテストです");
    }

    #[test]
    fn test_outline_can_be_disabled_from_the_environment() {
        let ws = Workspace::new();
        ws.add_pdf_with_title("titled.pdf", "Widget Survey: Final Report");
        ws.cmd("run")
            .env("OCR_BATCH_NO_OUTLINE", "true")
            .assert()
            .success();

        let record: serde_json::Value =
            serde_json::from_str(&ws.output("titled.ocr.json")).unwrap();
        assert!(record.get("title").is_none(), "{}", record);
    }

    #[test]
    fn test_models_lists_installed_models() {
        let ws = Workspace::new();
        ws.cmd("models")
            .assert()
            .success()
            .stdout(predicate::str::contains("jpn\tconfigured (priority 1)"))
            .stdout(predicate::str::contains("eng\n"));
    }
}

#[test]
#[ignore = "Needs poppler-utils and tesseract with CJK language data"]
fn test_run_real_tools() {
    let dir = tempfile::TempDir::with_prefix("cli-real").unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::copy("tests/fixtures/ocr/two_pages.pdf", input.join("two_pages.pdf")).unwrap();
    cmd()
        .arg("run")
        .arg("--input-dir")
        .arg(&input)
        .arg("--output-dir")
        .arg(dir.path().join("output"))
        .assert()
        .success();
    assert!(dir.path().join("output").join("two_pages.txt").exists());
}
