/// Starter script handed out to callers before they write their own code.
///
/// Must pass [`crate::filter::validate`]; the unit test below keeps it that way.
pub const PROCESSING_TEMPLATE: &str = r#"
# Template for processing your data file.
# The input file is mounted at /data/input_file.csv (or .xlsx/.xls).
# Write your results into /data/output.

import pandas as pd

df = pd.read_csv('/data/input_file.csv')

# Process your data here.
# Example: summary statistics
result = {
    'row_count': len(df),
    'column_count': len(df.columns),
    'columns': list(df.columns),
    'summary': df.describe().to_dict(),
}
print("result", result)

counts = {'row_count': result['row_count'], 'column_count': result['column_count']}
pd.Series(counts).to_json('/data/output/result.json')

df.columns = [col.upper() for col in df.columns]
df.to_csv('/data/output/processed_data.csv', index=False)

print("Processing completed successfully")
"#;
