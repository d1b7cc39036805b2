use ironvault_memdb::{PRIMARY_INDEX, Reader, TableRecord, WriteTxn};
use snafu::ensure;
use tracing::{debug, info};

use crate::{
    error::{GenerationMismatchSnafu, NotFoundSnafu, Result},
    model::GenerationNumber,
};

/// Revocation epochs of token-bearing records.
///
/// A generation number only moves forward. Tokens carry the generation they
/// were issued for; issuing the next generation revokes all earlier tokens.
pub struct GenerationRepo;

impl GenerationRepo {
    /// Stored generation of `uuid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn get<R: Reader>(reader: &R, uuid: &str) -> Result<Option<GenerationNumber>> {
        Ok(reader.first_as::<GenerationNumber>(PRIMARY_INDEX, &[uuid])?)
    }

    /// Creates the row at generation 0 unless it exists. Returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be written.
    pub fn create_if_absent(txn: &mut WriteTxn<'_>, uuid: &str) -> Result<GenerationNumber> {
        if let Some(existing) = Self::get(&*txn, uuid)? {
            return Ok(existing);
        }
        let row = GenerationNumber { uuid: uuid.to_string(), generation_number: 0 };
        txn.insert(row.clone())?;
        debug!(uuid, "generation number created");
        Ok(row)
    }

    /// Increments and stores the generation of `uuid`. Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::NotFound`](crate::IamError::NotFound) if no row exists.
    pub fn issue_next(txn: &mut WriteTxn<'_>, uuid: &str) -> Result<u64> {
        let mut row = Self::get(&*txn, uuid)?
            .ok_or_else(|| NotFoundSnafu { object_type: GenerationNumber::TABLE, id: uuid }.build())?;
        row.generation_number = row.generation_number.saturating_add(1);
        let next = row.generation_number;
        txn.insert(row)?;
        info!(uuid, generation = next, "generation issued");
        Ok(next)
    }

    /// Checks a presented generation against the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::NotFound`](crate::IamError::NotFound) if no row
    /// exists and [`IamError::GenerationMismatch`](crate::IamError::GenerationMismatch)
    /// if the numbers differ.
    pub fn verify<R: Reader>(reader: &R, uuid: &str, presented: u64) -> Result<()> {
        let row = Self::get(reader, uuid)?
            .ok_or_else(|| NotFoundSnafu { object_type: GenerationNumber::TABLE, id: uuid }.build())?;
        ensure!(
            row.generation_number == presented,
            GenerationMismatchSnafu { uuid, stored: row.generation_number, presented }
        );
        Ok(())
    }

    /// Applies a row received from another instance. A lower number than the
    /// stored one is ignored. Returns whether the row changed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be written.
    pub fn apply_replicated(txn: &mut WriteTxn<'_>, incoming: GenerationNumber) -> Result<bool> {
        if let Some(stored) = Self::get(&*txn, &incoming.uuid)?
            && stored.generation_number >= incoming.generation_number
        {
            return Ok(false);
        }
        txn.insert(incoming)?;
        Ok(true)
    }

    /// Removes the row of `uuid`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be removed.
    pub fn delete(txn: &mut WriteTxn<'_>, uuid: &str) -> Result<bool> {
        Ok(txn.remove(GenerationNumber::TABLE, uuid)?.is_some())
    }
}
