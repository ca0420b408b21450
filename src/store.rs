use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::err::Error;
use crate::models::{Account, PageRequest, PagedWorks, ProjectRecord, WorkSubmission};
use crate::upload::StagedFile;

const DEFAULT_DATABASE: &str = "portfolio";
const WORKS: &str = "projects";
const ACCOUNTS: &str = "users";

/// Gateway over the document store. Cloning shares the underlying client.
#[derive(Clone)]
pub struct DataStore {
    db: Database,
}

impl DataStore {
    /// Connects, pings the database, and ensures the unique login index.
    /// Any failure here is fatal for startup.
    pub async fn connect(uri: &str) -> Result<Self, Error> {
        let options = ClientOptions::parse(uri).await.map_err(Error::connection)?;
        let client = Client::with_options(options).map_err(Error::connection)?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(Error::connection)?;

        let login_index = IndexModel::builder()
            .keys(doc! { "Login": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        db.collection::<Account>(ACCOUNTS)
            .create_index(login_index, None)
            .await
            .map_err(Error::connection)?;

        log::info!("connected to document store, database `{}`", db.name());
        Ok(Self { db })
    }

    fn works(&self) -> Collection<ProjectRecord> {
        self.db.collection(WORKS)
    }

    fn accounts(&self) -> Collection<Account> {
        self.db.collection(ACCOUNTS)
    }

    /// The `limit` most recently uploaded records, payload excluded.
    pub async fn recent_works(&self, limit: i64) -> Result<Vec<ProjectRecord>, Error> {
        let options = FindOptions::builder()
            .sort(doc! { "dateUploaded": -1 })
            .projection(doc! { "data": 0 })
            .limit(limit)
            .build();
        Ok(self.works().find(doc! {}, options).await?.try_collect().await?)
    }

    /// One page of filtered records plus the total count for the same filter.
    /// The count is taken before the paging window is applied, so it does not
    /// vary with skip/take.
    pub async fn paged_works(&self, request: &PageRequest) -> Result<PagedWorks, Error> {
        let filter = work_filter(request);
        let window = request.take.max(0);
        let options = FindOptions::builder()
            .sort(doc! { "dateUploaded": -1 })
            .projection(doc! { "data": 0 })
            .skip(window_offset(request.skip, window))
            .limit(window)
            .build();

        let works = self
            .works()
            .find(filter.clone(), options)
            .await?
            .try_collect()
            .await?;
        let total_count = self.works().count_documents(filter, None).await?;

        Ok(PagedWorks { works, total_count })
    }

    pub async fn work_by_id(&self, id: ObjectId) -> Result<ProjectRecord, Error> {
        let options = FindOneOptions::builder()
            .projection(doc! { "data": 0 })
            .build();
        self.works()
            .find_one(doc! { "_id": id }, options)
            .await?
            .ok_or_else(|| Error::not_found(format!("no record with id {}", id)))
    }

    /// Full record including the inlined payload.
    pub async fn file_by_id(&self, id: ObjectId) -> Result<ProjectRecord, Error> {
        self.works()
            .find_one(doc! { "_id": id }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("no record with id {}", id)))
    }

    pub async fn distinct_years(&self) -> Result<Vec<i32>, Error> {
        let years = self.works().distinct("year", None, None).await?;
        Ok(years.iter().filter_map(Bson::as_i32).collect())
    }

    /// Inserts a new record (sentinel identity) with a server-assigned upload
    /// timestamp, or updates the mutable fields of an existing one. Updates
    /// never touch `fileName` or `data`.
    pub async fn save_work(
        &self,
        submission: &WorkSubmission,
        staged: Option<StagedFile>,
    ) -> Result<(), Error> {
        match submission.identity()? {
            None => {
                let record = ProjectRecord {
                    id: None,
                    name: submission.name.clone(),
                    source_link: submission.source_link.clone(),
                    project_type: submission.project_type.clone(),
                    semester: submission.semester,
                    year: submission.year,
                    author_name: submission.author_name.clone(),
                    date_uploaded: Utc::now(),
                    file_name: staged.as_ref().map(|file| file.file_name.clone()),
                    data: staged.map(|file| file.payload),
                };
                self.works().insert_one(&record, None).await?;
                Ok(())
            }
            Some(id) => {
                let update = doc! { "$set": {
                    "name": submission.name.clone(),
                    "sourceLink": submission.source_link.clone(),
                    "authorName": submission.author_name.clone(),
                    "projectType": submission.project_type.clone(),
                    "year": submission.year,
                    "semester": submission.semester,
                }};
                let result = self
                    .works()
                    .update_one(doc! { "_id": id }, update, None)
                    .await?;
                if result.matched_count == 0 {
                    return Err(Error::not_found(format!("no record with id {}", id)));
                }
                Ok(())
            }
        }
    }

    /// Deleting an absent record still reports success; callers rely on it.
    pub async fn remove_work(&self, id: ObjectId) -> Result<(), Error> {
        self.works().delete_one(doc! { "_id": id }, None).await?;
        Ok(())
    }

    pub async fn find_account(&self, login: &str) -> Result<Option<Account>, Error> {
        Ok(self.accounts().find_one(doc! { "Login": login }, None).await?)
    }

    /// Find-then-insert for the user-facing conflict message; the unique
    /// index closes the race window, so a concurrent duplicate surfaces as a
    /// duplicate-key write error and is mapped to the same conflict.
    pub async fn create_account(&self, login: &str, digest: &str) -> Result<(), Error> {
        if self.find_account(login).await?.is_some() {
            return Err(Error::conflict(format!("Username {} already exists", login)));
        }
        self.db
            .collection::<Document>(ACCOUNTS)
            .insert_one(doc! { "Login": login, "Password": digest }, None)
            .await
            .map_err(|err| {
                if is_duplicate_key(&err) {
                    Error::conflict(format!("Username {} already exists", login))
                } else {
                    Error::from(err)
                }
            })?;
        Ok(())
    }
}

fn window_offset(skip: u64, take: i64) -> u64 {
    skip.saturating_mul(take as u64)
}

fn work_filter(request: &PageRequest) -> Document {
    let mut filter = doc! {
        "name": { "$regex": request.name.as_deref().unwrap_or(""), "$options": "i" },
        "authorName": { "$regex": request.author_name.as_deref().unwrap_or(""), "$options": "i" },
    };
    if let Some(year) = request.year {
        filter.insert("year", year);
    }
    if let Some(semester) = request.semester {
        filter.insert("semester", semester);
    }
    filter
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == 11000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(name: Option<&str>, author: Option<&str>, year: Option<i32>) -> PageRequest {
        PageRequest {
            name: name.map(str::to_owned),
            author_name: author.map(str::to_owned),
            year,
            semester: None,
            skip: 0,
            take: 10,
        }
    }

    #[test]
    fn absent_filter_fields_leave_numbers_unconstrained() {
        let filter = work_filter(&page(None, None, None));
        assert!(!filter.contains_key("year"));
        assert!(!filter.contains_key("semester"));
    }

    #[test]
    fn absent_strings_match_everything() {
        let filter = work_filter(&page(None, None, None));
        let name = filter.get_document("name").unwrap();
        assert_eq!(name.get_str("$regex").unwrap(), "");
        assert_eq!(name.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn present_fields_constrain_the_filter() {
        let filter = work_filter(&page(Some("chess"), Some("dana"), Some(2023)));
        assert_eq!(
            filter.get_document("name").unwrap().get_str("$regex").unwrap(),
            "chess"
        );
        assert_eq!(filter.get_i32("year").unwrap(), 2023);
    }

    #[test]
    fn window_offset_is_pages_times_size() {
        assert_eq!(window_offset(0, 10), 0);
        assert_eq!(window_offset(3, 10), 30);
        assert_eq!(window_offset(2, 0), 0);
    }

    // The scenarios below need a reachable MongoDB; point
    // MONGODB_CONNECTION_STRING at one and run with `cargo test -- --ignored`.
    mod live {
        use super::super::*;
        use crate::auth::{authenticate, hash_password, AuthAttempt};
        use crate::models::RecordIdentity;

        async fn store() -> DataStore {
            let uri = std::env::var("MONGODB_CONNECTION_STRING")
                .expect("MONGODB_CONNECTION_STRING must be set for live store tests");
            DataStore::connect(&uri).await.expect("store connect")
        }

        fn unique(prefix: &str) -> String {
            format!("{}-{}", prefix, Utc::now().timestamp_millis())
        }

        fn submission(name: &str, author: &str, year: i32) -> WorkSubmission {
            WorkSubmission {
                id: None,
                name: name.to_string(),
                source_link: Some("https://example.com".to_string()),
                project_type: "web".to_string(),
                semester: 1,
                year,
                author_name: author.to_string(),
            }
        }

        async fn find_by_name(store: &DataStore, name: &str) -> ProjectRecord {
            let page = store
                .paged_works(&PageRequest {
                    name: Some(name.to_string()),
                    author_name: None,
                    year: None,
                    semester: None,
                    skip: 0,
                    take: 1,
                })
                .await
                .expect("paged query");
            page.works.into_iter().next().expect("record just saved")
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn saved_record_round_trips_and_update_keeps_payload() {
            let store = store().await;
            let name = unique("round-trip");

            let staged = StagedFile {
                file_name: "demo.zip".to_string(),
                payload: vec![9u8; 128],
            };
            store
                .save_work(&submission(&name, "Dana", 2024), Some(staged))
                .await
                .unwrap();

            let saved = find_by_name(&store, &name).await;
            let id = saved.id.unwrap();
            let fetched = store.work_by_id(id).await.unwrap();
            assert_eq!(fetched.name, name);
            assert_eq!(fetched.author_name, "Dana");
            assert_eq!(fetched.year, 2024);
            assert_eq!(fetched.semester, 1);
            assert_eq!(fetched.source_link.as_deref(), Some("https://example.com"));

            let mut updated = submission(&name, "Robin", 2025);
            updated.id = Some(RecordIdentity::Stored(id.to_hex()));
            store.save_work(&updated, None).await.unwrap();

            let after = store.file_by_id(id).await.unwrap();
            assert_eq!(after.author_name, "Robin");
            assert_eq!(after.year, 2025);
            assert_eq!(after.file_name.as_deref(), Some("demo.zip"));
            assert_eq!(after.data.as_ref().map(Vec::len), Some(128));

            store.remove_work(id).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn total_count_does_not_vary_with_the_window() {
            let store = store().await;
            let author = unique("counter");
            for n in 0..3 {
                store
                    .save_work(&submission(&format!("{}-{}", author, n), &author, 2024), None)
                    .await
                    .unwrap();
            }

            let narrow = store
                .paged_works(&PageRequest {
                    name: None,
                    author_name: Some(author.clone()),
                    year: None,
                    semester: None,
                    skip: 0,
                    take: 1,
                })
                .await
                .unwrap();
            let wide = store
                .paged_works(&PageRequest {
                    name: None,
                    author_name: Some(author.clone()),
                    year: None,
                    semester: None,
                    skip: 1,
                    take: 2,
                })
                .await
                .unwrap();

            assert_eq!(narrow.total_count, 3);
            assert_eq!(narrow.total_count, wide.total_count);
            assert_eq!(narrow.works.len(), 1);

            for work in wide.works.iter().chain(narrow.works.iter()) {
                let _ = store.remove_work(work.id.unwrap()).await;
            }
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn duplicate_years_collapse_to_one_distinct_value() {
            let store = store().await;
            // an implausible year keeps this test's data distinguishable
            let year = (Utc::now().timestamp_millis() % 1_000_000) as i32 + 10_000;
            let name = unique("years");
            for n in 0..2 {
                store
                    .save_work(&submission(&format!("{}-{}", name, n), "Dana", year), None)
                    .await
                    .unwrap();
            }

            let years = store.distinct_years().await.unwrap();
            assert_eq!(years.iter().filter(|y| **y == year).count(), 1);
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn sentinel_save_without_file_leaves_payload_null() {
            let store = store().await;
            let name = unique("no-file");
            let mut work = submission(&name, "Dana", 2024);
            work.id = Some(RecordIdentity::Fresh(0));
            store.save_work(&work, None).await.unwrap();

            let saved = find_by_name(&store, &name).await;
            let full = store.file_by_id(saved.id.unwrap()).await.unwrap();
            assert!(full.file_name.is_none());
            assert!(full.data.is_none());

            store.remove_work(saved.id.unwrap()).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn removing_a_missing_record_reports_success() {
            let store = store().await;
            assert!(store.remove_work(ObjectId::new()).await.is_ok());
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn updating_a_missing_record_is_not_found() {
            let store = store().await;
            let mut work = submission("ghost", "Dana", 2024);
            work.id = Some(RecordIdentity::Stored(ObjectId::new().to_hex()));
            assert!(matches!(
                store.save_work(&work, None).await,
                Err(Error::NotFound { .. })
            ));
        }

        #[tokio::test]
        #[ignore = "requires a running MongoDB"]
        async fn registration_conflicts_and_login_outcomes() {
            let store = store().await;
            let login = unique("alice");
            let digest = hash_password("pw1", 1_000).unwrap();

            store.create_account(&login, &digest).await.unwrap();
            assert!(matches!(
                store.create_account(&login, &digest).await,
                Err(Error::Conflict { .. })
            ));

            match authenticate(&store, &login, "pw1").await.unwrap() {
                AuthAttempt::Verified(account) => assert_eq!(account.login, login),
                other => panic!("expected verified login, got {:?}", other),
            }
            assert!(matches!(
                authenticate(&store, &login, "wrong").await.unwrap(),
                AuthAttempt::WrongPassword
            ));
            assert!(matches!(
                authenticate(&store, &unique("nobody"), "pw1").await.unwrap(),
                AuthAttempt::UnknownLogin
            ));
        }
    }
}
