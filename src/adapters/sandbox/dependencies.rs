//! Dependency detection for task scripts.
//!
//! Imports are read from top-level `import x` / `from x import y` statements,
//! reduced to their root module, filtered against the standard library and
//! mapped to the package name the installer expects.

use std::collections::BTreeSet;

/// Public standard-library modules (`sys.stdlib_module_names`, including
/// platform-specific and since-removed ones). Underscore-prefixed roots are
/// treated as private stdlib modules as well.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "aifc", "antigravity", "argparse", "array", "ast", "asynchat", "asyncio",
    "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect", "builtins", "bz2",
    "cProfile", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop",
    "collections", "colorsys", "compileall", "concurrent", "configparser", "contextlib",
    "contextvars", "copy", "copyreg", "crypt", "csv", "ctypes", "curses", "dataclasses", "datetime",
    "dbm", "decimal", "difflib", "dis", "distutils", "doctest", "email", "encodings", "ensurepip",
    "enum", "errno", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch", "fractions",
    "ftplib", "functools", "gc", "genericpath", "getopt", "getpass", "gettext", "glob", "graphlib",
    "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "idlelib", "imaplib", "imghdr",
    "imp", "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword", "lib2to3",
    "linecache", "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes",
    "mmap", "modulefinder", "msilib", "msvcrt", "multiprocessing", "netrc", "nis", "nntplib", "nt",
    "ntpath", "nturl2path", "numbers", "opcode", "operator", "optparse", "os", "ossaudiodev",
    "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib",
    "posix", "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr",
    "pydoc", "pydoc_data", "pyexpat", "queue", "quopri", "random", "re", "readline", "reprlib",
    "resource", "rlcompleter", "runpy", "sched", "secrets", "select", "selectors", "shelve",
    "shlex", "shutil", "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver",
    "spwd", "sqlite3", "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics",
    "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig",
    "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap", "this",
    "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace", "traceback",
    "tracemalloc", "tty", "turtle", "turtledemo", "types", "typing", "unicodedata", "unittest",
    "urllib", "uu", "uuid", "venv", "warnings", "wave", "weakref", "webbrowser", "winreg",
    "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
    "zoneinfo",
];

/// Import names whose installable package is named differently.
const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("pil", "pillow"),
    ("sklearn", "scikit-learn"),
    ("talib", "ta-lib"),
    ("yaml", "pyyaml"),
    ("dateutil", "python-dateutil"),
];

/// Packages required by the imports in `code`, sorted and deduplicated.
pub fn detect_dependencies(code: &str) -> Vec<String> {
    let mut packages = BTreeSet::new();
    for line in code.lines().map(str::trim_start) {
        for module in imported_modules(line) {
            if let Some(package) = package_for_module(module) {
                packages.insert(package);
            }
        }
    }
    packages.into_iter().collect()
}

/// Packages named by "No module named ..." lines in interpreter output.
pub fn missing_modules(stderr: &str) -> Vec<String> {
    let mut packages = BTreeSet::new();
    for line in stderr.lines() {
        let Some((_, rest)) = line.split_once("No module named ") else {
            continue;
        };
        let name = rest
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .split(['\'', '"'])
            .next()
            .unwrap_or_default();
        if let Some(package) = package_for_module(name) {
            packages.insert(package);
        }
    }
    packages.into_iter().collect()
}

/// Root modules imported by one line, if it is an import statement.
fn imported_modules(line: &str) -> Vec<&str> {
    if let Some(rest) = line.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .collect();
    }
    if let Some(rest) = line.strip_prefix("from ") {
        let mut words = rest.split_whitespace();
        if let (Some(module), Some("import")) = (words.next(), words.next()) {
            if !module.starts_with('.') {
                return vec![module];
            }
        }
    }
    Vec::new()
}

fn package_for_module(module: &str) -> Option<String> {
    let root = module.split('.').next()?.trim();
    let valid = root
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && root.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid || root.starts_with('_') || STDLIB_MODULES.contains(&root) {
        return None;
    }

    let lowered = root.to_ascii_lowercase();
    let package = PACKAGE_ALIASES
        .iter()
        .find(|(import, _)| *import == lowered)
        .map_or(root.to_string(), |(_, package)| (*package).to_string());
    Some(package)
}
