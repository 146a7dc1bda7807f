//! Static denylist check for submitted code.
//!
//! This is a heuristic gate that turns away the most obvious attempts to spawn
//! processes, evaluate strings or touch the filesystem. It is trivially
//! bypassed by anyone who tries (string concatenation, `getattr`, encodings)
//! and must not be treated as a security boundary. Isolation comes from the
//! container runtime; tests of this module should only assert that listed
//! tokens are caught, never that malicious code is.

/// Substrings that cause a submission to be rejected.
pub const DENYLIST: &[&str] = &[
    "subprocess",
    "os.system",
    "eval(",
    "exec(",
    "importlib",
    "sys.modules",
    "__import__",
    "open(",
    "file(",
    "execfile(",
    "compile(",
    "pty",
    "popen",
    "system",
];

/// Returns the first denylisted token found in `source`, in list order.
pub fn validate(source: &str) -> Result<(), &'static str> {
    match DENYLIST.iter().find(|token| source.contains(*token)) {
        Some(token) => Err(*token),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_pandas_code() {
        let code = "import pandas as pd\ndf = pd.read_csv('/data/input_file.csv')\nprint(len(df))\n";
        assert_eq!(validate(code), Ok(()));
    }

    #[test]
    fn rejects_every_listed_token() {
        for token in DENYLIST {
            let code = format!("x = 1\n{}\n", token);
            assert!(validate(&code).is_err(), "token {:?} slipped through", token);
        }
    }

    #[test]
    fn reports_first_token_in_list_order() {
        // "os.system" contains "system" as well; the earlier entry wins.
        assert_eq!(validate("os.system('ls')"), Err("os.system"));
        assert_eq!(validate("import subprocess; eval(x)"), Err("subprocess"));
    }

    #[test]
    fn match_is_case_sensitive() {
        assert_eq!(validate("SUBPROCESS"), Ok(()));
    }

    #[test]
    fn empty_source_is_accepted() {
        assert_eq!(validate(""), Ok(()));
    }
}
