//! Canonical object references.
//!
//! The gateway identifies every bound data point with an opaque, stable
//! string of the form `IED/LD/LN.DO[.DA…]`. The first slash separates the
//! IED name from the MMS object reference; the remainder is the MMS
//! `LD/LN.DO` form. On the wire the same point is addressed as a
//! domain-specific variable `LD/LN$FC$DO[$DA…]`, with the functional
//! constraint spliced in as the second `$` component.

use std::fmt;

use iec61850::iec61850::ObjectPath;
use snafu::ensure;

use crate::mms::{Fc, InvalidReference, SessionError};

/// A parsed canonical reference `IED/LD/LN.DO[.DA…]`.
///
/// Case-sensitive ASCII. Two references naming the same leaf compare equal
/// byte for byte, so the type derives structural equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectReference {
	/// The IED name.
	ied: String,
	/// The logical device instance.
	ld: String,
	/// The logical node name.
	ln: String,
	/// The data object name, possibly followed by data attribute names.
	path: Vec<String>,
}

impl ObjectReference {
	/// Parse a canonical reference.
	pub fn parse(reference: &str) -> Result<Self, SessionError> {
		let mut parts = reference.split('/');
		let (Some(ied), Some(ld), Some(rest), None) =
			(parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return InvalidReference { reference }.fail();
		};

		let mut dotted = rest.split('.');
		let ln = dotted.next().unwrap_or_default();
		let path: Vec<String> = dotted.map(str::to_owned).collect();

		ensure!(
			!ied.is_empty()
				&& !ld.is_empty()
				&& !ln.is_empty()
				&& !path.is_empty()
				&& path.iter().all(|p| !p.is_empty())
				&& reference.is_ascii(),
			InvalidReference { reference }
		);

		Ok(Self { ied: ied.to_owned(), ld: ld.to_owned(), ln: ln.to_owned(), path })
	}

	/// Build a reference from its parts. The path holds the data object name
	/// followed by any data attribute names.
	#[must_use]
	pub fn from_parts(ied: &str, ld: &str, ln: &str, path: Vec<String>) -> Self {
		Self { ied: ied.to_owned(), ld: ld.to_owned(), ln: ln.to_owned(), path }
	}

	/// The IED name.
	#[must_use]
	pub fn ied(&self) -> &str {
		&self.ied
	}

	/// The logical device instance.
	#[must_use]
	pub fn ld(&self) -> &str {
		&self.ld
	}

	/// The logical node name.
	#[must_use]
	pub fn ln(&self) -> &str {
		&self.ln
	}

	/// The data object name.
	#[must_use]
	pub fn data_object(&self) -> &str {
		&self.path[0]
	}

	/// A copy of this reference with extra data attribute components
	/// appended, e.g. `.stVal` or `.mag.f`.
	#[must_use]
	pub fn with_suffix(&self, suffix: &str) -> Self {
		let mut path = self.path.clone();
		path.extend(suffix.trim_start_matches('.').split('.').map(str::to_owned));
		Self { ied: self.ied.clone(), ld: self.ld.clone(), ln: self.ln.clone(), path }
	}

	/// The MMS item id for this reference under the given functional
	/// constraint: `LN$FC$DO[$DA…]`.
	#[must_use]
	pub fn mms_item(&self, fc: Fc) -> String {
		let mut item = format!("{}${}", self.ln, fc.as_str());
		for part in &self.path {
			item.push('$');
			item.push_str(part);
		}
		item
	}

	/// The `iec61850` client path (`LD/LN$FC$DO[$DA…]`) for this reference.
	#[must_use]
	pub fn object_path(&self, fc: Fc) -> ObjectPath {
		(self.ld.as_str(), self.mms_item(fc)).into()
	}

	/// Rebuild a canonical DO-level reference from an MMS dataset entry of
	/// the form `LD/LN$FC$DO[$DA…]`. Deeper attribute components are
	/// dropped; the result addresses the data object the entry belongs to.
	pub fn from_mms_entry(ied: &str, entry: &str) -> Result<Self, SessionError> {
		let (ld, item) = entry.split_once('/').unwrap_or(("", entry));
		let mut parts = item.split('$');
		let (Some(ln), Some(_fc), Some(data_object)) = (parts.next(), parts.next(), parts.next())
		else {
			return InvalidReference { reference: entry }.fail();
		};
		ensure!(!ld.is_empty() && !ln.is_empty(), InvalidReference { reference: entry });
		Ok(Self {
			ied: ied.to_owned(),
			ld: ld.to_owned(),
			ln: ln.to_owned(),
			path: vec![data_object.to_owned()],
		})
	}
}

impl fmt::Display for ObjectReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}.{}", self.ied, self.ld, self.ln, self.path.join("."))
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_do_reference() {
		let reference = ObjectReference::parse("IED1/LD0/GGIO1.SPCSO1").unwrap();
		assert_eq!(reference.ied(), "IED1");
		assert_eq!(reference.ld(), "LD0");
		assert_eq!(reference.ln(), "GGIO1");
		assert_eq!(reference.data_object(), "SPCSO1");
		assert_eq!(reference.to_string(), "IED1/LD0/GGIO1.SPCSO1");
	}

	#[test]
	fn test_parse_da_reference() {
		let reference = ObjectReference::parse("IED1/LD0/MMXU1.TotW.mag.f").unwrap();
		assert_eq!(reference.data_object(), "TotW");
		assert_eq!(reference.mms_item(Fc::Mx), "MMXU1$MX$TotW$mag$f");
	}

	#[test]
	fn test_parse_rejects_malformed() {
		for bad in ["", "IED1", "IED1/LD0", "IED1/LD0/GGIO1", "IED1/LD0/GGIO1.", "a/b/c.d/e"] {
			assert!(ObjectReference::parse(bad).is_err(), "accepted {bad:?}");
		}
	}

	#[test]
	fn test_suffix_and_item() {
		let reference = ObjectReference::parse("IED1/LD0/MMXU1.TotW").unwrap();
		let magf = reference.with_suffix(".mag.f");
		assert_eq!(magf.to_string(), "IED1/LD0/MMXU1.TotW.mag.f");
		assert_eq!(magf.mms_item(Fc::Mx), "MMXU1$MX$TotW$mag$f");
		assert_eq!(reference.with_suffix("stVal").mms_item(Fc::St), "MMXU1$ST$TotW$stVal");
	}

	#[test]
	fn test_from_mms_entry() {
		let reference = ObjectReference::from_mms_entry("IED1", "LD0/MMXU1$MX$TotW$mag$f").unwrap();
		assert_eq!(reference.to_string(), "IED1/LD0/MMXU1.TotW");
		assert!(ObjectReference::from_mms_entry("IED1", "LD0/MMXU1").is_err());
	}
}
