use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

const COUNTRY_CODE: &str = "254";
/// Digits of a Kenyan mobile subscriber number after the country code.
const SUBSCRIBER_DIGITS: usize = 9;

/// A mobile-money eligible phone number in canonical `+254XXXXXXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalizes local (`07..`), international (`2547..`) and E.164
    /// (`+2547..`) inputs to `+254XXXXXXXXX`.
    ///
    /// Separators such as spaces and dashes are ignored. Anything that does not
    /// leave exactly nine subscriber digits is rejected.
    pub fn normalize(input: &str) -> Result<Self, PaymentError> {
        let digits: String = input.chars().filter(char::is_ascii_digit).collect();

        let subscriber = if let Some(rest) = digits.strip_prefix(COUNTRY_CODE) {
            rest
        } else if let Some(rest) = digits.strip_prefix('0') {
            rest
        } else {
            digits.as_str()
        };

        if subscriber.len() != SUBSCRIBER_DIGITS {
            return Err(PaymentError::ValidationError(format!(
                "Invalid phone number: {input}"
            )));
        }

        Ok(Self(format!("+{COUNTRY_CODE}{subscriber}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
