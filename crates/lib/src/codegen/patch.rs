use std::borrow::Cow;

use tracing::warn;

/// Replace the quoted version following the first `marker` with `version`.
///
/// The splice touches only the characters between the end of the marker and
/// the next `"`; every other byte is preserved. A missing marker or closing
/// quote leaves the contents untouched. Later occurrences of the marker are
/// left alone and reported.
pub fn patch_version_pin<'a>(contents: &'a str, marker: &str, version: &str) -> Cow<'a, str> {
  let Some(found) = contents.find(marker) else {
    return Cow::Borrowed(contents);
  };
  let start = found + marker.len();
  let Some(len) = contents[start..].find('"') else {
    return Cow::Borrowed(contents);
  };
  let end = start + len;

  let extra = contents[end..].matches(marker).count();
  if extra > 0 {
    warn!(extra, "project file pins the client more than once, only the first pin was updated");
  }

  let mut patched = String::with_capacity(contents.len() - len + version.len());
  patched.push_str(&contents[..start]);
  patched.push_str(version);
  patched.push_str(&contents[end..]);
  Cow::Owned(patched)
}
