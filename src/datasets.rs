//! Loaders for the item, interaction and user tables.
//!
//! MovieLens-1M ships `::`-separated, ISO-8859-1 encoded files:
//!
//! - `movies.dat`: `MovieID::Title::Genres`
//! - `ratings.dat`: `UserID::MovieID::Rating::Timestamp`
//! - `users.dat`: `UserID::Gender::Age::Occupation::Zip-code`
//!
//! Rows of `ratings.dat` are kept in file order, which is taken to be
//! chronological per user.
use std::fs;
use std::path::Path;
use std::str::FromStr;

use failure;
use tracing::info;

use crate::data::{Interaction, Movie, RecordStore, User};

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// A row with missing or unparseable fields.
    #[fail(display = "Malformed row {} in {}.", line, file)]
    MalformedRow {
        /// File name.
        file: String,
        /// 1-based line number.
        line: usize,
    },
}

/// Read a `::`-separated file. Bytes are decoded as ISO-8859-1.
fn read_dat(path: &Path) -> Result<Vec<(usize, Vec<String>)>, failure::Error> {
    let contents: String = fs::read(path)?.into_iter().map(char::from).collect();

    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| (idx + 1, line.split("::").map(str::to_owned).collect()))
        .collect())
}

fn field<T: FromStr>(
    path: &Path,
    line: usize,
    fields: &[String],
    idx: usize,
) -> Result<T, DatasetError> {
    fields
        .get(idx)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| DatasetError::MalformedRow {
            file: path.display().to_string(),
            line,
        })
}

fn read_movies(path: &Path) -> Result<Vec<Movie>, failure::Error> {
    read_dat(path)?
        .into_iter()
        .map(|(line, fields)| -> Result<_, failure::Error> {
            Ok(Movie {
                item_id: field(path, line, &fields, 0)?,
                title: field(path, line, &fields, 1)?,
            })
        })
        .collect()
}

fn read_ratings(path: &Path) -> Result<Vec<Interaction>, failure::Error> {
    read_dat(path)?
        .into_iter()
        .map(|(line, fields)| -> Result<_, failure::Error> {
            Ok(Interaction::new(
                field(path, line, &fields, 0)?,
                field(path, line, &fields, 1)?,
                field(path, line, &fields, 2)?,
                field(path, line, &fields, 3)?,
            ))
        })
        .collect()
}

fn read_users(path: &Path) -> Result<Vec<User>, failure::Error> {
    read_dat(path)?
        .into_iter()
        .map(|(line, fields)| -> Result<_, failure::Error> {
            Ok(User {
                user_id: field(path, line, &fields, 0)?,
            })
        })
        .collect()
}

/// Load `movies.dat`, `ratings.dat` and `users.dat` from `data_dir`.
pub fn load_movielens_1m<P: AsRef<Path>>(data_dir: P) -> Result<RecordStore, failure::Error> {
    let data_dir = data_dir.as_ref();

    let movies = read_movies(&data_dir.join("movies.dat"))?;
    let interactions = read_ratings(&data_dir.join("ratings.dat"))?;
    let users = read_users(&data_dir.join("users.dat"))?;

    info!(
        movies = movies.len(),
        interactions = interactions.len(),
        users = users.len(),
        "Loaded {}",
        data_dir.display()
    );

    Ok(RecordStore::new(movies, interactions, users))
}

/// Load the three tables from CSV files with headers matching the field
/// names of [`Movie`], [`Interaction`] and [`User`].
#[cfg(feature = "csv")]
pub fn load_csv<P: AsRef<Path>>(
    movies: P,
    interactions: P,
    users: P,
) -> Result<RecordStore, failure::Error> {
    let movies: Vec<Movie> = csv::Reader::from_path(movies)?
        .deserialize()
        .collect::<Result<Vec<_>, _>>()?;
    let interactions: Vec<Interaction> = csv::Reader::from_path(interactions)?
        .deserialize()
        .collect::<Result<Vec<_>, _>>()?;
    let users: Vec<User> = csv::Reader::from_path(users)?
        .deserialize()
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        movies = movies.len(),
        interactions = interactions.len(),
        users = users.len(),
        "Loaded CSV tables"
    );

    Ok(RecordStore::new(movies, interactions, users))
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;

    fn write(path: &Path, contents: &[u8]) {
        File::create(path).unwrap().write_all(contents).unwrap();
    }

    #[test]
    fn movielens_1m_format() {
        let dir = tempdir().unwrap();

        write(
            &dir.path().join("movies.dat"),
            b"1::Toy Story (1995)::Animation|Children's|Comedy\n\
              5::Cit\xe9 des enfants perdus, La (1995)::Adventure|Sci-Fi\n",
        );
        write(
            &dir.path().join("ratings.dat"),
            b"1::5::5::978300760\n1::1::3::978302109\n2::1::4::978301968\n",
        );
        write(
            &dir.path().join("users.dat"),
            b"1::F::1::10::48067\n2::M::56::16::70072\n",
        );

        let store = load_movielens_1m(dir.path()).unwrap();

        assert_eq!(store.movies().len(), 2);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get_movie(1).unwrap(), "Toy Story (1995)");
        assert_eq!(
            store.get_movie(5).unwrap(),
            "Cit\u{e9} des enfants perdus, La (1995)"
        );
        assert_eq!(store.interactions()[0], Interaction::new(1, 5, 5.0, 978300760));
        assert_eq!(store.user_ids(), vec![1, 2]);
        assert_eq!(store.vocabulary().unwrap().item_vocab_size, 5);
    }

    #[test]
    fn malformed_rows_are_reported() {
        let dir = tempdir().unwrap();

        write(&dir.path().join("movies.dat"), b"1::Heat (1995)::Action\n");
        write(&dir.path().join("ratings.dat"), b"1::1::5::1\n1::oops::5::2\n");
        write(&dir.path().join("users.dat"), b"1::F::1::10::48067\n");

        let error = load_movielens_1m(dir.path()).unwrap_err();

        match error.downcast::<DatasetError>().unwrap() {
            DatasetError::MalformedRow { line, .. } => assert_eq!(line, 2),
        }
    }

    #[test]
    fn missing_files_fail() {
        let dir = tempdir().unwrap();

        assert!(load_movielens_1m(dir.path()).is_err());
    }

    #[cfg(feature = "csv")]
    #[test]
    fn csv_tables() {
        let dir = tempdir().unwrap();
        let movies = dir.path().join("movies.csv");
        let interactions = dir.path().join("ratings.csv");
        let users = dir.path().join("users.csv");

        write(&movies, b"item_id,title\n1,Heat (1995)\n2,Casino (1995)\n");
        write(
            &interactions,
            b"user_id,item_id,rating,timestamp\n3,2,4.5,10\n3,1,3.0,11\n",
        );
        write(&users, b"user_id\n3\n");

        let store = load_csv(&movies, &interactions, &users).unwrap();

        assert_eq!(store.get_movie(2).unwrap(), "Casino (1995)");
        assert_eq!(store.collect_sessions(&[3]).get(3).unwrap(), &[2, 1]);
    }
}
