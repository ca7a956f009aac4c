use crate::interp::ExecRecord;

#[derive(Clone, Debug)]
struct ExecutionEntry {
    code: String,
    stdout: String,
    stderr: String,
    execution_number: usize,
    duration_secs: f64,
}

/// Per-engine execution trace. Writes to stderr so the worker protocol on
/// stdout stays clean.
#[derive(Clone, Debug)]
pub struct ExecutionLog {
    enabled: bool,
    entries: Vec<ExecutionEntry>,
    execution_count: usize,
    max_output_length: usize,
}

impl ExecutionLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
            execution_count: 0,
            max_output_length: 2000,
        }
    }

    pub fn record(&mut self, code: &str, record: &ExecRecord) {
        self.execution_count += 1;
        self.entries.push(ExecutionEntry {
            code: code.to_owned(),
            stdout: record.stdout.clone(),
            stderr: record.stderr.clone(),
            execution_number: self.execution_count,
            duration_secs: record.duration_secs,
        });
    }

    pub fn display_last(&self) {
        if !self.enabled {
            return;
        }
        if let Some(last) = self.entries.last() {
            self.display_entry(last);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.execution_count = 0;
    }

    fn display_entry(&self, entry: &ExecutionEntry) {
        eprintln!("EXECUTION [{}]:", entry.execution_number);
        eprintln!("  Code:\n{}", self.truncate_output(&entry.code));
        if !entry.stderr.is_empty() {
            eprintln!("  Stderr:\n{}", self.truncate_output(&entry.stderr));
        } else if !entry.stdout.is_empty() {
            eprintln!("  Stdout:\n{}", self.truncate_output(&entry.stdout));
        } else {
            eprintln!("  Output: No output");
        }
        eprintln!("  Duration: {:.4}s", entry.duration_secs);
    }

    fn truncate_output(&self, text: &str) -> String {
        if text.len() <= self.max_output_length {
            return text.to_owned();
        }
        let half_len = self.max_output_length / 2;
        let first_part = slice_to_boundary(text, half_len);
        let mut last_start = text.len().saturating_sub(half_len);
        while !text.is_char_boundary(last_start) {
            last_start = last_start.saturating_sub(1);
        }
        let last_part = &text[last_start..];
        let truncated_chars = text.len() - self.max_output_length;
        format!("{first_part}\n\n... [TRUNCATED {truncated_chars} characters] ...\n\n{last_part}")
    }
}

fn slice_to_boundary(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while !text.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stdout: &str) -> ExecRecord {
        ExecRecord {
            stdout: stdout.to_owned(),
            stderr: String::new(),
            value: None,
            failure: None,
            duration_secs: 0.01,
        }
    }

    #[test]
    fn counts_recorded_executions() {
        let mut log = ExecutionLog::new(false);
        assert!(log.is_empty());
        log.record("1+1", &record("2\n"));
        log.record("2+2", &record("4\n"));
        assert_eq!(log.len(), 2);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut log = ExecutionLog::new(false);
        log.max_output_length = 10;
        let text = "é".repeat(40);
        let truncated = log.truncate_output(&text);
        assert!(truncated.contains("TRUNCATED"));
    }
}
