//! JS-source helper library injected ahead of every expression. Everything
//! an expression can reach lives here or in the allowlisted ECMAScript
//! globals (`Math`, `JSON`) boa ships natively — there is no `require`,
//! no `fetch`, no filesystem binding to strip because boa never implements
//! them in the first place.

pub(crate) const PRELUDE: &str = r#"
function contains(hay, needle) {
  if (hay === null || hay === undefined) return false;
  if (Array.isArray(hay)) return hay.indexOf(needle) !== -1;
  return String(hay).indexOf(needle) !== -1;
}
function startsWith(hay, needle) { return String(hay).startsWith(needle); }
function endsWith(hay, needle) { return String(hay).endsWith(needle); }
function length(x) {
  if (x === null || x === undefined) return 0;
  if (Array.isArray(x) || typeof x === "string") return x.length;
  if (typeof x === "object") return Object.keys(x).length;
  return 0;
}
function always() { return true; }
function success() { return metadata.critical === 0 && metadata.error === 0; }
function failure() { return !success(); }
var __visor_logs = [];
function log() {
  var parts = [];
  for (var i = 0; i < arguments.length; i++) parts.push(String(arguments[i]));
  __visor_logs.push(parts.join(" "));
}
function __globToRegExp(pattern) {
  var escaped = pattern.replace(/[.+^${}()|[\]\\]/g, "\\$&");
  escaped = escaped.replace(/\*\*/g, " ").replace(/\*/g, "[^/]*").replace(/ /g, ".*");
  return new RegExp("^" + escaped + "$");
}
function hasIssue(arr, field, value) {
  if (!Array.isArray(arr)) return false;
  return arr.some(function (i) { return i && i[field] === value; });
}
function countIssues(arr, field, value) {
  if (!Array.isArray(arr)) return 0;
  if (field === undefined) return arr.length;
  return arr.filter(function (i) { return i && i[field] === value; }).length;
}
function hasFileMatching(arr, pattern) {
  if (!Array.isArray(arr)) return false;
  var re = __globToRegExp(pattern);
  return arr.some(function (i) { return i && typeof i.file === "string" && re.test(i.file); });
}
function hasSuggestion(arr) {
  if (!Array.isArray(arr)) return false;
  return arr.some(function (i) { return i && !!i.suggestion; });
}
var hasIssueWith = hasIssue;
var hasFileWith = hasFileMatching;
var memory = {
  get: function (key, ns) {
    var bucket = __memorySnapshot[ns || "default"] || {};
    return bucket.hasOwnProperty(key) ? bucket[key] : undefined;
  },
  has: function (key, ns) {
    var bucket = __memorySnapshot[ns || "default"] || {};
    return bucket.hasOwnProperty(key);
  },
};
var console = { log: log, warn: log, error: log };
"#;
