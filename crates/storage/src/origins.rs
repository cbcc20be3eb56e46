//! Set of agents that contributed to a merged export row

use std::{collections::BTreeSet, convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const DELIMITER: char = ',';

/// Ordered set of origin identifiers.
///
/// Serializes to its sorted members joined by a comma, so equal sets always
/// produce the same stored text regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginSet(BTreeSet<String>);

impl OriginSet {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, origin: impl Into<String>) {
		self.0.insert(origin.into());
	}

	/// Union with another set
	pub fn merge(&mut self, other: &Self) {
		self.0.extend(other.0.iter().cloned());
	}

	#[must_use]
	pub fn size(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn contains(&self, origin: &str) -> bool {
		self.0.contains(origin)
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Inverse of the [`Display`](fmt::Display) form.
	///
	/// An empty string yields a set with a single empty origin, same as any
	/// other split would.
	#[must_use]
	pub fn parse(s: &str) -> Self {
		s.split(DELIMITER).collect()
	}
}

impl fmt::Display for OriginSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for origin in &self.0 {
			if !first {
				write!(f, "{DELIMITER}")?;
			}
			f.write_str(origin)?;
			first = false;
		}
		Ok(())
	}
}

impl FromStr for OriginSet {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::parse(s))
	}
}

impl<S: Into<String>> FromIterator<S> for OriginSet {
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		Self(iter.into_iter().map(Into::into).collect())
	}
}

impl<S: Into<String>> Extend<S> for OriginSet {
	fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
		self.0.extend(iter.into_iter().map(Into::into));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn serialization_is_sorted_and_stable() {
		let a: OriginSet = ["c", "a", "b"].into_iter().collect();
		let b: OriginSet = ["b", "c", "a", "b"].into_iter().collect();

		assert_eq!(a.to_string(), "a,b,c");
		assert_eq!(a.to_string(), b.to_string());
		assert_eq!(a.size(), 3);
	}

	#[test]
	fn merge_is_a_union() {
		let mut a: OriginSet = ["a", "b"].into_iter().collect();
		let b: OriginSet = ["b", "d"].into_iter().collect();

		a.merge(&b);

		assert_eq!(a.to_string(), "a,b,d");
		assert_eq!(b.size(), 2);
	}

	#[test]
	fn parse_inverts_display() {
		let set: OriginSet = ["agent-1", "agent-0"].into_iter().collect();
		assert_eq!(OriginSet::parse(&set.to_string()), set);
		assert_eq!("x".parse::<OriginSet>().unwrap().size(), 1);
	}

	#[test]
	fn empty_text_parses_to_single_empty_origin() {
		let parsed = OriginSet::parse("");

		assert_eq!(parsed.size(), 1);
		assert!(parsed.contains(""));
		assert_eq!(OriginSet::new().to_string(), "");
	}
}
